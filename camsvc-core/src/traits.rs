//! 外部协作方的边界 Trait
//!
//! Core 只通过这些接口访问驱动 (HAL)、Host 传输层与权限子系统。
//! 所有调用对 Core 来说都是同步的；超时由传输层负责，以 `DriverStatus::Timeout` 形式返回。

use std::sync::Arc;

use crate::descriptor::{
    CaptureEndedInfo, CaptureErrorInfo, CaptureInfo, OperationMode, ResultCallbackMode, StreamInfo,
};
use crate::error::HalResult;
use crate::identity::TokenId;
use crate::metadata::CameraMetadata;
use crate::status::{HalCameraEvent, HalCameraStatus, HalErrorType, HalFlashlightStatus};

// --- 1. Host 层：设备枚举与打开 ---

/// Host 传输层入口：按服务名连接一个 Camera Host
pub trait HostConnector: Send + Sync {
    fn connect(&self, host_name: &str) -> HalResult<Arc<dyn CameraHost>>;
}

/// 一个 Camera Host (本地 / 分布式相机提供方)
pub trait CameraHost: Send + Sync {
    /// 注册状态回调。Host 应只持有它，不应反向延长 Core 对象的生命周期。
    fn set_callback(&self, callback: Arc<dyn HostCallback>);

    fn camera_ids(&self) -> HalResult<Vec<String>>;

    fn camera_ability(&self, camera_id: &str) -> HalResult<CameraMetadata>;

    fn open_camera(
        &self,
        camera_id: &str,
        callback: Arc<dyn DeviceCallback>,
    ) -> HalResult<Arc<dyn CameraDeviceHal>>;

    fn set_flashlight(&self, camera_id: &str, enable: bool) -> HalResult<()>;
}

/// Host → Core 的状态通知
pub trait HostCallback: Send + Sync {
    fn on_camera_status(&self, camera_id: &str, status: HalCameraStatus);
    fn on_flashlight_status(&self, camera_id: &str, status: HalFlashlightStatus);
    fn on_camera_event(&self, camera_id: &str, event: HalCameraEvent);
}

// --- 2. 设备层 ---

/// 已打开的驱动设备句柄
pub trait CameraDeviceHal: Send + Sync {
    fn stream_operator(
        &self,
        callback: Arc<dyn StreamOperatorCallback>,
    ) -> HalResult<Arc<dyn StreamOperator>>;

    fn update_settings(&self, settings: &CameraMetadata) -> HalResult<()>;

    fn set_result_mode(&self, mode: ResultCallbackMode) -> HalResult<()>;

    fn enable_result(&self, tags: &[u32]) -> HalResult<()>;

    fn disable_result(&self, tags: &[u32]) -> HalResult<()>;

    fn close(&self);
}

/// 驱动设备 → Core 的异步事件
pub trait DeviceCallback: Send + Sync {
    fn on_error(&self, error: HalErrorType, vendor_code: i32);
    fn on_result(&self, timestamp: u64, result: &CameraMetadata);
}

// --- 3. 数据面：Stream Operator ---

pub trait StreamOperator: Send + Sync {
    fn create_streams(&self, infos: &[StreamInfo]) -> HalResult<()>;

    fn commit_streams(&self, mode: OperationMode, settings: &CameraMetadata) -> HalResult<()>;

    fn release_streams(&self, stream_ids: &[i32]) -> HalResult<()>;

    fn capture(&self, capture_id: i32, info: &CaptureInfo, is_streaming: bool) -> HalResult<()>;

    fn cancel_capture(&self, capture_id: i32) -> HalResult<()>;
}

/// Stream Operator → Core 的回调，来自驱动线程
pub trait StreamOperatorCallback: Send + Sync {
    fn on_capture_started(&self, capture_id: i32, stream_ids: &[i32]);
    fn on_capture_ended(&self, capture_id: i32, infos: &[CaptureEndedInfo]);
    fn on_capture_error(&self, capture_id: i32, infos: &[CaptureErrorInfo]);
    fn on_frame_shutter(&self, capture_id: i32, stream_ids: &[i32], timestamp: u64);
}

// --- 4. 权限与隐私 ---

pub trait PermissionBroker: Send + Sync {
    /// 静态授权检查 (是否被授予该权限)
    fn verify_access(&self, token: TokenId, permission: &str) -> bool;

    /// 隐私检查 (此刻是否允许使用，如应用在前台)
    fn is_usage_allowed(&self, token: TokenId, permission: &str) -> bool;

    /// 开始使用，返回 false 表示登记失败 (不影响调用方流程)
    fn start_using(
        &self,
        token: TokenId,
        permission: &str,
        observer: Arc<dyn UsageStateObserver>,
    ) -> bool;

    fn stop_using(&self, token: TokenId, permission: &str) -> bool;

    fn register_state_change(
        &self,
        token: TokenId,
        permission: &str,
        observer: Arc<dyn PermissionStateObserver>,
    ) -> bool;

    fn unregister_state_change(&self, observer: &Arc<dyn PermissionStateObserver>) -> bool;
}

/// 前后台切换通知
pub trait UsageStateObserver: Send + Sync {
    fn on_usage_state_changed(&self, token: TokenId, is_foreground: bool);
}

/// 授权变化通知 (撤销 / 授予)
pub trait PermissionStateObserver: Send + Sync {
    fn on_permission_state_changed(&self, token: TokenId, permission: &str, granted: bool);
}
