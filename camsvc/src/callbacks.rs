//! 面向客户端的回调接口
//!
//! 传输层把远端对象包装成这些 Trait 交给服务。服务只在必要的地方持有强引用，
//! 设备对状态订阅者一律只保存 `Weak`。

use camsvc_core::descriptor::StreamErrorKind;
use camsvc_core::metadata::CameraMetadata;
use camsvc_core::status::{CameraStatus, DeviceError, FlashStatus};

/// 进程级服务回调 (相机可用状态、闪光灯状态)
pub trait ServiceCallback: Send + Sync {
    fn on_camera_status(&self, camera_id: &str, status: CameraStatus);
    fn on_flashlight_status(&self, camera_id: &str, status: FlashStatus);
}

/// 单个设备的回调
pub trait DeviceServiceCallback: Send + Sync {
    fn on_error(&self, error: DeviceError, vendor_code: i32);
    fn on_result(&self, timestamp: u64, result: &CameraMetadata);
}

pub trait MuteCallback: Send + Sync {
    fn on_camera_mute(&self, muted: bool);
}

/// 会话被服务端强制释放的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ReleaseReason {
    /// 同一相机被其他会话抢占，或同进程创建了新会话
    Preempted,
    /// 相机权限被撤销
    PermissionRevoked,
    /// 应用切到后台
    Background,
    /// 相机或其所在的 Host 掉线
    DeviceDisconnected,
    ClientDied,
    ServiceStopped,
}

pub trait SessionCallback: Send + Sync {
    fn on_force_released(&self, reason: ReleaseReason);
}

/// 预览/录像流回调
pub trait RepeatStreamCallback: Send + Sync {
    fn on_frame_started(&self);
    fn on_frame_ended(&self, frame_count: i32);
    fn on_frame_error(&self, error: StreamErrorKind);
}

/// 拍照流回调
pub trait CaptureStreamCallback: Send + Sync {
    fn on_capture_started(&self, capture_id: i32);
    fn on_capture_ended(&self, capture_id: i32, frame_count: i32);
    fn on_capture_error(&self, capture_id: i32, error: StreamErrorKind);
    fn on_frame_shutter(&self, capture_id: i32, timestamp: u64);
}
