use bitflags::bitflags;

use crate::metadata::{tags, CameraMetadata};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 相机朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum CameraPosition {
    Unspecified,
    Back,
    Front,
    Other,
}

impl From<u8> for CameraPosition {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Unspecified,
            1 => Self::Back,
            2 => Self::Front,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum CameraType {
    Unspecified,
    WideAngle,
    UltraWide,
    Telephoto,
    TrueDepth,
}

impl From<u8> for CameraType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::WideAngle,
            2 => Self::UltraWide,
            3 => Self::Telephoto,
            4 => Self::TrueDepth,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum ConnectionType {
    BuiltIn,
    UsbPlugin,
    Remote,
}

impl From<u8> for ConnectionType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::UsbPlugin,
            2 => Self::Remote,
            _ => Self::BuiltIn,
        }
    }
}

bitflags! {
    /// 从 Ability 推导出的可选特性
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
    pub struct CameraFeatures: u32 {
        /// 支持拍照镜像
        const MIRROR = 1 << 0;
        /// 支持隐私静音 (黑帧)
        const MUTE = 1 << 1;
        /// 带闪光灯
        const FLASH = 1 << 2;
    }
}

/// Ability Metadata 的只读视图
#[derive(Debug, Clone, Copy)]
pub struct CameraAbility<'a> {
    meta: &'a CameraMetadata,
}

impl<'a> CameraAbility<'a> {
    pub fn new(meta: &'a CameraMetadata) -> Self {
        Self { meta }
    }

    pub fn position(&self) -> CameraPosition {
        self.meta
            .get_u8(tags::ABILITY_CAMERA_POSITION)
            .map(CameraPosition::from)
            .unwrap_or(CameraPosition::Other)
    }

    pub fn camera_type(&self) -> CameraType {
        self.meta
            .get_u8(tags::ABILITY_CAMERA_TYPE)
            .map(CameraType::from)
            .unwrap_or(CameraType::Unspecified)
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.meta
            .get_u8(tags::ABILITY_CAMERA_CONNECTION_TYPE)
            .map(ConnectionType::from)
            .unwrap_or(ConnectionType::BuiltIn)
    }

    /// 传感器安装角度，缺省 0
    pub fn sensor_orientation(&self) -> i32 {
        self.meta.get_i32(tags::SENSOR_ORIENTATION).unwrap_or(0)
    }

    pub fn features(&self) -> CameraFeatures {
        let mut features = CameraFeatures::empty();
        if matches!(
            self.meta.get_u8(tags::CONTROL_CAPTURE_MIRROR_SUPPORTED),
            Some(0) | Some(1)
        ) {
            features |= CameraFeatures::MIRROR;
        }
        if self.meta.contains(tags::ABILITY_MUTE_MODES) {
            features |= CameraFeatures::MUTE;
        }
        if self.meta.get_u8(tags::ABILITY_FLASH_AVAILABLE) == Some(1) {
            features |= CameraFeatures::FLASH;
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ability_view_reads_known_tags() {
        let mut meta = CameraMetadata::unbounded();
        meta.set_u8(tags::ABILITY_CAMERA_POSITION, &[2]).unwrap();
        meta.set_u8(tags::ABILITY_CAMERA_CONNECTION_TYPE, &[2]).unwrap();
        meta.set_i32(tags::SENSOR_ORIENTATION, &[270]).unwrap();
        meta.set_u8(tags::ABILITY_MUTE_MODES, &[0, 1]).unwrap();

        let ability = CameraAbility::new(&meta);
        assert_eq!(ability.position(), CameraPosition::Front);
        assert_eq!(ability.connection_type(), ConnectionType::Remote);
        assert_eq!(ability.sensor_orientation(), 270);
        assert_eq!(ability.features(), CameraFeatures::MUTE);
    }

    #[test]
    fn empty_ability_uses_defaults() {
        let meta = CameraMetadata::unbounded();
        let ability = CameraAbility::new(&meta);
        assert_eq!(ability.position(), CameraPosition::Other);
        assert_eq!(ability.camera_type(), CameraType::Unspecified);
        assert_eq!(ability.sensor_orientation(), 0);
        assert!(ability.features().is_empty());
    }
}
