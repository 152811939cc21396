#![warn(rust_2018_idioms, unreachable_pub)]

pub mod callbacks;
pub mod device;
pub mod dump;
pub mod host_manager;
pub(crate) mod internal; // 内部模块，不对外暴露
pub mod service;
pub mod session;
pub mod stream;

// Re-export 常用类型
pub use device::CameraDevice;
pub use service::CameraService;
pub use session::{CaptureSession, SessionState};
pub use stream::OutputStream;

/// 预置模块，用户可以通过 `use camsvc::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::callbacks::{
        CaptureStreamCallback, DeviceServiceCallback, MuteCallback, ReleaseReason,
        RepeatStreamCallback, ServiceCallback, SessionCallback,
    };
    pub use crate::device::CameraDevice;
    pub use crate::host_manager::CameraHostManager;
    pub use crate::service::CameraService;
    pub use crate::session::{CaptureSession, SessionRegistry, SessionState};
    pub use crate::stream::{OutputStream, RepeatKind, StreamKind};
    pub use camsvc_core::prelude::*;
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
