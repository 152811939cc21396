use thiserror::Error;

use crate::metadata::MetadataError;

/// 服务层错误码
///
/// 校验类错误 (`InvalidArg` / `InvalidState` / `InvalidSessionConfig`) 总是在任何副作用之前返回，
/// 调用方可以认为状态未被修改。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid session config: {0}")]
    InvalidSessionConfig(String),

    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),

    #[error("Permission denied: {permission}")]
    PermissionDenied { permission: String },

    #[error("Allocation failure")]
    AllocationFailure,

    /// 相机被其他会话抢占 (输掉了竞争，而不是硬件故障)
    #[error("Device preempted by another session")]
    DevicePreempted,

    #[error("Device request timed out")]
    DeviceRequestTimeout,

    #[error("Driver failure (status {0})")]
    DriverFailure(i32),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl CameraError {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidSessionConfig(msg.into())
    }

    pub fn permission_denied(permission: &str) -> Self {
        Self::PermissionDenied {
            permission: permission.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;

/// 驱动 (HAL) 返回码
///
/// 所有驱动调用对 Core 来说都是同步的，失败时返回该枚举，Core 不做重试。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverStatus {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("camera busy")]
    CameraBusy,
    #[error("camera closed")]
    CameraClosed,
    #[error("device error")]
    DeviceError,
    #[error("method not supported")]
    MethodNotSupported,
    #[error("request timeout")]
    Timeout,
    #[error("preempted")]
    Preempted,
    #[error("vendor status {0}")]
    Vendor(i32),
}

impl DriverStatus {
    /// 与驱动接口约定的数值返回码
    pub fn code(&self) -> i32 {
        match self {
            Self::CameraBusy => -1,
            Self::InsufficientResources => -2,
            Self::InvalidArgument => -3,
            Self::MethodNotSupported => -4,
            Self::CameraClosed => -5,
            Self::DeviceError => -6,
            Self::Timeout => -7,
            Self::Preempted => -8,
            Self::Vendor(code) => *code,
        }
    }
}

impl From<DriverStatus> for CameraError {
    fn from(status: DriverStatus) -> Self {
        match status {
            DriverStatus::InvalidArgument => {
                CameraError::InvalidArg("rejected by driver".to_string())
            }
            DriverStatus::InsufficientResources => CameraError::AllocationFailure,
            DriverStatus::Timeout => CameraError::DeviceRequestTimeout,
            DriverStatus::Preempted | DriverStatus::CameraBusy => CameraError::DevicePreempted,
            other => CameraError::DriverFailure(other.code()),
        }
    }
}

pub type HalResult<T> = std::result::Result<T, DriverStatus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_status_maps_to_service_error() {
        assert_eq!(
            CameraError::from(DriverStatus::Timeout),
            CameraError::DeviceRequestTimeout
        );
        assert_eq!(
            CameraError::from(DriverStatus::CameraBusy),
            CameraError::DevicePreempted
        );
        assert_eq!(
            CameraError::from(DriverStatus::InsufficientResources),
            CameraError::AllocationFailure
        );
        // 未单独区分的错误统一透传驱动返回码
        assert_eq!(
            CameraError::from(DriverStatus::DeviceError),
            CameraError::DriverFailure(-6)
        );
        assert_eq!(
            CameraError::from(DriverStatus::Vendor(-1001)),
            CameraError::DriverFailure(-1001)
        );
    }
}
