//! 输出流 (StreamCommon family)
//!
//! 每个输出流是一个 `Arc<OutputStream>`：公共的链接状态 + 按类型区分的变体。
//! 变体专有的操作 (`start/stop`、`capture`) 只能在 `as_repeat()` / `as_capture()`
//! 类型检查之后访问。

mod capture;
mod metadata;
mod repeat;

pub use capture::{CaptureTicket, Capturing};
pub use repeat::{RepeatKind, Repeating};

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use camsvc_core::buffer::BufferProducer;
use camsvc_core::descriptor::{StreamInfo, StreamIntent};
use camsvc_core::error::{CameraError, Result};
use camsvc_core::metadata::CameraMetadata;
use camsvc_core::pixel_format::PixelFormat;
use camsvc_core::traits::StreamOperator;

use capture::CaptureStream;
use metadata::MetadataStream;
use repeat::RepeatStream;

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum StreamKind {
    Repeat,
    Capture,
    Metadata,
}

/// 进程内的 capture ID 分配器
///
/// 单调递增，不回收；溢出后从 1 重新开始。
#[derive(Debug)]
pub struct CaptureIdAllocator {
    next: AtomicI32,
}

impl Default for CaptureIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    pub fn allocate(&self) -> i32 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id > 0 {
            return id;
        }
        // 回绕
        self.next.store(2, Ordering::Relaxed);
        1
    }
}

/// 链接状态
#[derive(Default)]
struct StreamCommon {
    stream_id: Option<i32>,
    linked: bool,
    release_pending: bool,
    operator: Option<Arc<dyn StreamOperator>>,
    /// link 时设备的 ability/settings 合成视图
    ability: Option<Arc<CameraMetadata>>,
    producer: Option<Arc<dyn BufferProducer>>,
}

/// 回滚用的链接快照
#[derive(Clone)]
pub(crate) struct LinkSnapshot {
    stream_id: Option<i32>,
    linked: bool,
    operator: Option<Arc<dyn StreamOperator>>,
    ability: Option<Arc<CameraMetadata>>,
}

/// link 之后变体操作需要的上下文
pub(crate) struct LinkedContext {
    pub(crate) stream_id: i32,
    pub(crate) operator: Arc<dyn StreamOperator>,
    pub(crate) ability: Arc<CameraMetadata>,
}

enum StreamVariant {
    Repeat(RepeatStream),
    Capture(CaptureStream),
    Metadata(MetadataStream),
}

pub struct OutputStream {
    format: PixelFormat,
    width: u32,
    height: u32,
    common: Mutex<StreamCommon>,
    capture_ids: Arc<CaptureIdAllocator>,
    variant: StreamVariant,
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let common = self.common.lock();
        f.debug_struct("OutputStream")
            .field("kind", &self.kind())
            .field("stream_id", &common.stream_id)
            .field("format", &self.format)
            .field("size", &(self.width, self.height))
            .field("linked", &common.linked)
            .field("release_pending", &common.release_pending)
            .finish()
    }
}

impl OutputStream {
    fn build(
        variant: StreamVariant,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
        width: u32,
        height: u32,
        capture_ids: Arc<CaptureIdAllocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            format,
            width,
            height,
            common: Mutex::new(StreamCommon {
                producer,
                ..Default::default()
            }),
            capture_ids,
            variant,
        })
    }

    /// 预览/录像流；`producer` 为空表示延迟绑定的预览
    pub fn new_repeat(
        kind: RepeatKind,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
        width: u32,
        height: u32,
        capture_ids: Arc<CaptureIdAllocator>,
    ) -> Arc<Self> {
        let deferred = producer.is_none();
        Self::build(
            StreamVariant::Repeat(RepeatStream::new(kind, deferred)),
            producer,
            format,
            width,
            height,
            capture_ids,
        )
    }

    pub fn new_capture(
        producer: Arc<dyn BufferProducer>,
        format: PixelFormat,
        width: u32,
        height: u32,
        capture_ids: Arc<CaptureIdAllocator>,
    ) -> Arc<Self> {
        Self::build(
            StreamVariant::Capture(CaptureStream::new()),
            Some(producer),
            format,
            width,
            height,
            capture_ids,
        )
    }

    /// 元数据流的尺寸取 Surface 默认尺寸
    pub fn new_metadata(
        producer: Arc<dyn BufferProducer>,
        format: PixelFormat,
        capture_ids: Arc<CaptureIdAllocator>,
    ) -> Arc<Self> {
        let (width, height) = producer.default_size();
        Self::build(
            StreamVariant::Metadata(MetadataStream),
            Some(producer),
            format,
            width,
            height,
            capture_ids,
        )
    }

    pub fn kind(&self) -> StreamKind {
        match &self.variant {
            StreamVariant::Repeat(_) => StreamKind::Repeat,
            StreamVariant::Capture(_) => StreamKind::Capture,
            StreamVariant::Metadata(_) => StreamKind::Metadata,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stream_id(&self) -> Option<i32> {
        self.common.lock().stream_id
    }

    pub fn is_linked(&self) -> bool {
        self.common.lock().linked
    }

    pub fn is_release_pending(&self) -> bool {
        self.common.lock().release_pending
    }

    pub fn has_producer(&self) -> bool {
        self.common.lock().producer.is_some()
    }

    pub fn as_repeat(&self) -> Option<Repeating<'_>> {
        match &self.variant {
            StreamVariant::Repeat(repeat) => Some(Repeating::new(self, repeat)),
            _ => None,
        }
    }

    pub fn as_capture(&self) -> Option<Capturing<'_>> {
        match &self.variant {
            StreamVariant::Capture(capture) => Some(Capturing::new(self, capture)),
            _ => None,
        }
    }

    /// 绑定到设备的 Stream Operator
    ///
    /// 已链接时直接返回现有 ID；标记为待释放时返回 `InvalidState`。
    pub fn link_input(
        &self,
        operator: Arc<dyn StreamOperator>,
        ability: Arc<CameraMetadata>,
        proposed_id: i32,
    ) -> Result<i32> {
        let mut common = self.common.lock();
        if common.release_pending {
            return Err(CameraError::invalid_state("stream is pending release"));
        }
        if let (true, Some(id)) = (common.linked, common.stream_id) {
            return Ok(id);
        }
        common.stream_id = Some(proposed_id);
        common.linked = true;
        common.operator = Some(operator);
        common.ability = Some(ability);
        debug!(stream_id = proposed_id, kind = ?self.kind(), "Stream linked");
        Ok(proposed_id)
    }

    /// 生成驱动侧描述符，无副作用
    pub fn describe(&self) -> StreamInfo {
        let common = self.common.lock();
        let intent = match &self.variant {
            StreamVariant::Repeat(repeat) => repeat.intent(),
            StreamVariant::Capture(_) => StreamIntent::StillCapture,
            StreamVariant::Metadata(_) => StreamIntent::Analyze,
        };
        StreamInfo {
            stream_id: common.stream_id.unwrap_or(-1),
            width: self.width,
            height: self.height,
            format: self.format,
            intent,
            tunneled_mode: true,
            producer: common.producer.clone(),
            encode_type: self.format.is_encoded().then_some(self.format),
        }
    }

    /// 释放：停止活动、解除链接并清空 Buffer 目标。可重复调用。
    pub fn release(&self) {
        if let Some(repeat) = self.as_repeat() {
            if let Err(e) = repeat.stop() {
                debug!(error = %e, "Stop on release failed");
            }
        }
        let mut common = self.common.lock();
        if common.linked {
            debug!(stream_id = ?common.stream_id, kind = ?self.kind(), "Stream released");
        }
        common.linked = false;
        common.release_pending = false;
        common.operator = None;
        common.ability = None;
        common.producer = None;
    }

    pub(crate) fn set_release_pending(&self, pending: bool) {
        self.common.lock().release_pending = pending;
    }

    /// 解除与旧设备的链接，保留 ID 与 Buffer 目标
    pub(crate) fn unlink(&self) {
        let mut common = self.common.lock();
        common.linked = false;
        common.operator = None;
        common.ability = None;
    }

    pub(crate) fn link_snapshot(&self) -> LinkSnapshot {
        let common = self.common.lock();
        LinkSnapshot {
            stream_id: common.stream_id,
            linked: common.linked,
            operator: common.operator.clone(),
            ability: common.ability.clone(),
        }
    }

    pub(crate) fn restore_link(&self, snapshot: LinkSnapshot) {
        let mut common = self.common.lock();
        common.stream_id = snapshot.stream_id;
        common.linked = snapshot.linked;
        common.operator = snapshot.operator;
        common.ability = snapshot.ability;
    }

    pub(crate) fn set_producer(&self, producer: Arc<dyn BufferProducer>) {
        self.common.lock().producer = Some(producer);
    }

    /// 已链接时返回操作上下文，否则 `InvalidState`
    pub(crate) fn linked_context(&self) -> Result<LinkedContext> {
        let common = self.common.lock();
        match (&common.operator, &common.ability, common.stream_id) {
            (Some(operator), Some(ability), Some(stream_id)) if common.linked => {
                Ok(LinkedContext {
                    stream_id,
                    operator: operator.clone(),
                    ability: ability.clone(),
                })
            }
            _ => Err(CameraError::invalid_state("stream is not linked")),
        }
    }

    pub(crate) fn capture_ids(&self) -> &CaptureIdAllocator {
        &self.capture_ids
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use camsvc_core::descriptor::{CaptureInfo, OperationMode, StreamInfo};
    use camsvc_core::error::HalResult;
    use camsvc_core::metadata::CameraMetadata;
    use camsvc_core::traits::StreamOperator;

    /// 只记录 capture 调用的 Stream Operator
    #[derive(Default)]
    pub(crate) struct RecordingOperator {
        pub(crate) captures: Mutex<Vec<(i32, CaptureInfo, bool)>>,
        pub(crate) cancelled: Mutex<Vec<i32>>,
    }

    impl StreamOperator for RecordingOperator {
        fn create_streams(&self, _infos: &[StreamInfo]) -> HalResult<()> {
            Ok(())
        }

        fn commit_streams(&self, _mode: OperationMode, _settings: &CameraMetadata) -> HalResult<()> {
            Ok(())
        }

        fn release_streams(&self, _stream_ids: &[i32]) -> HalResult<()> {
            Ok(())
        }

        fn capture(&self, capture_id: i32, info: &CaptureInfo, is_streaming: bool) -> HalResult<()> {
            self.captures
                .lock()
                .push((capture_id, info.clone(), is_streaming));
            Ok(())
        }

        fn cancel_capture(&self, capture_id: i32) -> HalResult<()> {
            self.cancelled.lock().push(capture_id);
            Ok(())
        }
    }

    pub(crate) fn operator() -> Arc<RecordingOperator> {
        Arc::new(RecordingOperator::default())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::operator;
    use super::*;
    use camsvc_simulation::SimBufferProducer;

    fn preview(ids: &Arc<CaptureIdAllocator>) -> Arc<OutputStream> {
        OutputStream::new_repeat(
            RepeatKind::Preview,
            Some(SimBufferProducer::new(640, 480)),
            PixelFormat::YCrCb420Sp,
            640,
            480,
            ids.clone(),
        )
    }

    #[test]
    fn link_is_idempotent() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = preview(&ids);
        let ability = Arc::new(CameraMetadata::unbounded());

        assert_eq!(stream.link_input(operator(), ability.clone(), 3).unwrap(), 3);
        assert_eq!(stream.link_input(operator(), ability, 9).unwrap(), 3);
        assert_eq!(stream.stream_id(), Some(3));
    }

    #[test]
    fn link_rejected_while_release_pending() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = preview(&ids);
        stream.set_release_pending(true);

        let err = stream
            .link_input(operator(), Arc::new(CameraMetadata::unbounded()), 1)
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
        assert!(!stream.is_linked());
    }

    #[test]
    fn describe_reflects_variant() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let video = OutputStream::new_repeat(
            RepeatKind::Video,
            Some(SimBufferProducer::new(1280, 720)),
            PixelFormat::YCbCr420Sp,
            1280,
            720,
            ids.clone(),
        );
        let photo = OutputStream::new_capture(
            SimBufferProducer::new(1920, 1080),
            PixelFormat::Jpeg,
            1920,
            1080,
            ids.clone(),
        );
        let meta = OutputStream::new_metadata(
            SimBufferProducer::new(320, 240),
            PixelFormat::Rgba8888,
            ids,
        );

        assert_eq!(video.describe().intent, StreamIntent::Video);
        let info = photo.describe();
        assert_eq!(info.intent, StreamIntent::StillCapture);
        assert_eq!(info.encode_type, Some(PixelFormat::Jpeg));
        assert_eq!(info.stream_id, -1);
        assert_eq!(meta.describe().intent, StreamIntent::Analyze);
        assert_eq!(meta.size(), (320, 240));
    }

    #[test]
    fn release_twice_is_safe() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = preview(&ids);
        stream
            .link_input(operator(), Arc::new(CameraMetadata::unbounded()), 1)
            .unwrap();

        stream.release();
        stream.release();
        assert!(!stream.is_linked());
        assert!(!stream.has_producer());
        assert!(stream.describe().producer.is_none());
    }

    #[test]
    fn snapshot_restores_link() {
        let ids = Arc::new(CaptureIdAllocator::new());
        let stream = preview(&ids);
        stream
            .link_input(operator(), Arc::new(CameraMetadata::unbounded()), 5)
            .unwrap();
        let snapshot = stream.link_snapshot();

        stream.unlink();
        assert!(!stream.is_linked());
        stream.restore_link(snapshot);
        assert!(stream.is_linked());
        assert_eq!(stream.stream_id(), Some(5));
    }

    #[test]
    fn capture_ids_are_unique() {
        let ids = CaptureIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_ne!(a, b);
        assert!(a > 0 && b > 0);
    }
}
