use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 常用 Metadata Tag
///
/// 值本身对 Core 是不透明的，这里只列出会话/设备逻辑需要读写的条目。
pub mod tags {
    // --- Ability (只读能力) ---
    pub const ABILITY_CAMERA_POSITION: u32 = 0x0001_0000;
    pub const ABILITY_CAMERA_TYPE: u32 = 0x0001_0001;
    pub const ABILITY_CAMERA_CONNECTION_TYPE: u32 = 0x0001_0002;
    pub const ABILITY_MUTE_MODES: u32 = 0x0001_0003;
    pub const ABILITY_FLASH_AVAILABLE: u32 = 0x0001_0004;

    // --- Sensor ---
    /// 传感器安装角度 (0/90/180/270)
    pub const SENSOR_ORIENTATION: u32 = 0x0002_0000;

    // --- Control ---
    pub const CONTROL_CAPTURE_MIRROR_SUPPORTED: u32 = 0x0003_0000;
    pub const CONTROL_CAPTURE_MIRROR: u32 = 0x0003_0001;
    pub const CONTROL_MUTE_MODE: u32 = 0x0003_0002;

    // --- JPEG ---
    /// 拍照旋转角度，客户端请求值与最终下发值共用该条目
    pub const JPEG_ORIENTATION: u32 = 0x0004_0000;
    pub const JPEG_QUALITY: u32 = 0x0004_0001;
}

/// 条目值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum MetadataType {
    U8,
    I32,
    U32,
    F32,
    I64,
    F64,
}

impl MetadataType {
    /// 单个元素的字节数
    pub fn size(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Metadata tag {tag:#x}: type mismatch (existing {existing:?}, new {new:?})")]
    TypeMismatch {
        tag: u32,
        existing: MetadataType,
        new: MetadataType,
    },

    #[error("Metadata tag {tag:#x}: payload length {len} is not a multiple of {elem}")]
    InvalidLength { tag: u32, len: usize, elem: usize },

    #[error("Metadata item capacity exceeded ({capacity} items)")]
    ItemCapacityExceeded { capacity: usize },

    #[error("Metadata data capacity exceeded ({capacity} bytes)")]
    DataCapacityExceeded { capacity: usize },
}

/// 单个条目：值类型 + 原始小端字节
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct MetadataEntry {
    pub data_type: MetadataType,
    pub data: Vec<u8>,
}

impl MetadataEntry {
    pub fn from_u8(values: &[u8]) -> Self {
        Self {
            data_type: MetadataType::U8,
            data: values.to_vec(),
        }
    }

    pub fn from_i32(values: &[i32]) -> Self {
        Self {
            data_type: MetadataType::I32,
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    /// 元素个数
    pub fn count(&self) -> usize {
        self.data.len() / self.data_type.size()
    }

    /// 按 i32 解读 (Vec<u8> 不保证 4 字节对齐，逐个 unaligned 读取)
    pub fn to_i32_vec(&self) -> Vec<i32> {
        if self.data_type != MetadataType::I32 {
            return Vec::new();
        }
        self.data
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<i32>)
            .collect()
    }

    fn validate(&self, tag: u32) -> Result<(), MetadataError> {
        let elem = self.data_type.size();
        if self.data.len() % elem != 0 {
            return Err(MetadataError::InvalidLength {
                tag,
                len: self.data.len(),
                elem,
            });
        }
        Ok(())
    }
}

/// 相机 Metadata 容器
///
/// 对 Core 来说是不透明载荷：按 Tag 存放条目，提供 add-or-replace 合并。
/// 容量上限模拟驱动侧预分配的 settings buffer，超过上限视为合并失败。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct CameraMetadata {
    entries: BTreeMap<u32, MetadataEntry>,
    item_capacity: usize,
    data_capacity: usize,
}

impl Default for CameraMetadata {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl CameraMetadata {
    pub fn new(item_capacity: usize, data_capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            item_capacity,
            data_capacity,
        }
    }

    /// 无容量限制 (Ability 缓存、快照合成等)
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 全部条目的数据字节数
    pub fn data_size(&self) -> usize {
        self.entries.values().map(|e| e.data.len()).sum()
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn get(&self, tag: u32) -> Option<&MetadataEntry> {
        self.entries.get(&tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn get_u8(&self, tag: u32) -> Option<u8> {
        self.entries
            .get(&tag)
            .filter(|e| e.data_type == MetadataType::U8)
            .and_then(|e| e.data.first().copied())
    }

    pub fn get_i32(&self, tag: u32) -> Option<i32> {
        self.entries
            .get(&tag)
            .and_then(|e| e.to_i32_vec().first().copied())
    }

    pub fn set_u8(&mut self, tag: u32, values: &[u8]) -> Result<(), MetadataError> {
        self.insert(tag, MetadataEntry::from_u8(values))
    }

    pub fn set_i32(&mut self, tag: u32, values: &[i32]) -> Result<(), MetadataError> {
        self.insert(tag, MetadataEntry::from_i32(values))
    }

    /// 单条 add-or-replace
    pub fn insert(&mut self, tag: u32, entry: MetadataEntry) -> Result<(), MetadataError> {
        let mut single = BTreeMap::new();
        single.insert(tag, entry);
        self.apply(single)
    }

    pub fn remove(&mut self, tag: u32) -> Option<MetadataEntry> {
        self.entries.remove(&tag)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 把 `delta` 逐条合并进来 (add-or-replace)
    ///
    /// 任何一条失败都会让整个调用失败，且 `self` 保持不变。
    pub fn merge_from(&mut self, delta: &CameraMetadata) -> Result<(), MetadataError> {
        self.apply(delta.entries.clone()).map_err(|e| {
            debug!(
                entries = delta.len(),
                held = self.len(),
                item_capacity = self.item_capacity,
                error = %e,
                "Metadata merge rejected"
            );
            e
        })
    }

    /// 以 `self` 为底、`top` 覆盖，生成一个无容量限制的新容器
    pub fn overlaid(&self, top: &CameraMetadata) -> CameraMetadata {
        let mut entries = self.entries.clone();
        for (tag, entry) in &top.entries {
            entries.insert(*tag, entry.clone());
        }
        CameraMetadata {
            entries,
            item_capacity: usize::MAX,
            data_capacity: usize::MAX,
        }
    }

    fn apply(&mut self, delta: BTreeMap<u32, MetadataEntry>) -> Result<(), MetadataError> {
        // 先整体校验，再一次性写入
        let mut items = self.entries.len();
        let mut data = self.data_size();
        for (tag, entry) in &delta {
            entry.validate(*tag)?;
            match self.entries.get(tag) {
                Some(existing) => {
                    if existing.data_type != entry.data_type {
                        return Err(MetadataError::TypeMismatch {
                            tag: *tag,
                            existing: existing.data_type,
                            new: entry.data_type,
                        });
                    }
                    data = data - existing.data.len() + entry.data.len();
                }
                None => {
                    items += 1;
                    data += entry.data.len();
                }
            }
        }
        if items > self.item_capacity {
            return Err(MetadataError::ItemCapacityExceeded {
                capacity: self.item_capacity,
            });
        }
        if data > self.data_capacity {
            return Err(MetadataError::DataCapacityExceeded {
                capacity: self.data_capacity,
            });
        }
        self.entries.extend(delta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_round_trip_through_raw_bytes() {
        let mut meta = CameraMetadata::unbounded();
        meta.set_i32(tags::SENSOR_ORIENTATION, &[270]).unwrap();
        meta.set_u8(tags::ABILITY_CAMERA_POSITION, &[1]).unwrap();

        assert_eq!(meta.get_i32(tags::SENSOR_ORIENTATION), Some(270));
        assert_eq!(meta.get_u8(tags::ABILITY_CAMERA_POSITION), Some(1));
        // 类型不符时按缺失处理
        assert_eq!(meta.get_u8(tags::SENSOR_ORIENTATION), None);
    }

    #[test]
    fn merge_replaces_existing_and_adds_new() {
        let mut base = CameraMetadata::new(8, 64);
        base.set_i32(tags::JPEG_ORIENTATION, &[0]).unwrap();

        let mut delta = CameraMetadata::unbounded();
        delta.set_i32(tags::JPEG_ORIENTATION, &[90]).unwrap();
        delta.set_u8(tags::JPEG_QUALITY, &[95]).unwrap();

        base.merge_from(&delta).unwrap();
        assert_eq!(base.len(), 2);
        assert_eq!(base.get_i32(tags::JPEG_ORIENTATION), Some(90));
        assert_eq!(base.get_u8(tags::JPEG_QUALITY), Some(95));
    }

    #[test]
    fn failed_merge_leaves_container_untouched() {
        let mut base = CameraMetadata::new(8, 64);
        base.set_u8(tags::CONTROL_MUTE_MODE, &[0]).unwrap();
        let before = base.clone();

        // 第一条合法，第二条类型冲突：整体失败
        let mut delta = CameraMetadata::unbounded();
        delta.set_u8(tags::JPEG_QUALITY, &[80]).unwrap();
        delta.set_i32(tags::CONTROL_MUTE_MODE, &[1]).unwrap();

        let err = base.merge_from(&delta).unwrap_err();
        assert!(matches!(err, MetadataError::TypeMismatch { .. }));
        assert_eq!(base, before);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut base = CameraMetadata::new(1, 64);
        base.set_u8(tags::JPEG_QUALITY, &[80]).unwrap();
        let err = base.set_u8(tags::CONTROL_MUTE_MODE, &[1]).unwrap_err();
        assert_eq!(err, MetadataError::ItemCapacityExceeded { capacity: 1 });

        let mut small = CameraMetadata::new(4, 4);
        let err = small.set_i32(tags::SENSOR_ORIENTATION, &[0, 90]).unwrap_err();
        assert_eq!(err, MetadataError::DataCapacityExceeded { capacity: 4 });
        assert!(small.is_empty());
    }

    #[test]
    fn overlay_prefers_top_layer() {
        let mut ability = CameraMetadata::unbounded();
        ability.set_i32(tags::SENSOR_ORIENTATION, &[90]).unwrap();
        ability.set_u8(tags::CONTROL_MUTE_MODE, &[0]).unwrap();

        let mut settings = CameraMetadata::new(1, 1);
        settings.set_u8(tags::CONTROL_MUTE_MODE, &[1]).unwrap();

        let merged = ability.overlaid(&settings);
        assert_eq!(merged.get_u8(tags::CONTROL_MUTE_MODE), Some(1));
        assert_eq!(merged.get_i32(tags::SENSOR_ORIENTATION), Some(90));
    }

    #[test]
    fn rejected_merge_is_logged() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        struct CountDebug(Arc<AtomicUsize>);

        impl<S: Subscriber> Layer<S> for CountDebug {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == Level::DEBUG {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountDebug(hits.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let mut base = CameraMetadata::new(1, 64);
            base.set_u8(tags::JPEG_QUALITY, &[80]).unwrap();

            let mut delta = CameraMetadata::unbounded();
            delta.set_u8(tags::CONTROL_MUTE_MODE, &[1]).unwrap();
            assert!(base.merge_from(&delta).is_err());

            // 合法的合并不记日志
            base.merge_from(&CameraMetadata::unbounded()).unwrap();
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
