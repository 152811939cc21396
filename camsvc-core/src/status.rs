use std::fmt;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 广播给客户端的相机可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum CameraStatus {
    /// 新相机接入
    Appear,
    /// 相机移除
    Disappear,
    /// 空闲，可以打开
    Available,
    /// 已被占用
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum FlashStatus {
    Off,
    On,
    Unavailable,
}

/// 设备级异步错误
///
/// 通过设备回调投递给客户端。`DevicePreempted` 总是先于会话被强制释放送达，
/// 客户端据此区分 "被抢占" 与 "自己调用了 Release"。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    RequestTimeout,
    DriverError,
    DevicePreempted,
    DeviceDisconnected,
    Fatal,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RequestTimeout => "request timeout",
            Self::DriverError => "driver error",
            Self::DevicePreempted => "device preempted",
            Self::DeviceDisconnected => "device disconnected",
            Self::Fatal => "fatal error",
        };
        f.write_str(s)
    }
}

// --- 驱动侧上报的原始状态 ---

/// 驱动上报的错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalErrorType {
    RequestTimeout,
    DriverError,
    DevicePreempt,
    DeviceDisconnect,
    Fatal,
}

impl From<HalErrorType> for DeviceError {
    fn from(t: HalErrorType) -> Self {
        match t {
            HalErrorType::RequestTimeout => Self::RequestTimeout,
            HalErrorType::DriverError => Self::DriverError,
            HalErrorType::DevicePreempt => Self::DevicePreempted,
            HalErrorType::DeviceDisconnect => Self::DeviceDisconnected,
            HalErrorType::Fatal => Self::Fatal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalCameraStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalCameraEvent {
    DeviceAdded,
    DeviceRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalFlashlightStatus {
    Off,
    On,
    Unavailable,
}

impl From<HalFlashlightStatus> for FlashStatus {
    fn from(s: HalFlashlightStatus) -> Self {
        match s {
            HalFlashlightStatus::Off => Self::Off,
            HalFlashlightStatus::On => Self::On,
            HalFlashlightStatus::Unavailable => Self::Unavailable,
        }
    }
}

/// Host 服务的上线/下线通知 (按 host 名称)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostServiceStatus {
    Started,
    Stopped,
}
