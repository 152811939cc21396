// 开启一些 Clippy 检查，保证代码质量
#![warn(rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod ability;
pub mod buffer;
pub mod builder;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod pixel_format;
pub mod status;
pub mod traits;

// 方便上层使用的 Prelude
pub mod prelude {
    pub use crate::ability::{CameraAbility, CameraFeatures, CameraPosition};
    pub use crate::buffer::BufferProducer;
    pub use crate::builder::ServiceConfig;
    pub use crate::descriptor::{CaptureInfo, StreamInfo, StreamIntent};
    pub use crate::error::{CameraError, DriverStatus, HalResult, Result};
    pub use crate::identity::{ClientIdentity, Pid, TokenId};
    pub use crate::metadata::{tags, CameraMetadata};
    pub use crate::pixel_format::PixelFormat;
    pub use crate::status::{CameraStatus, DeviceError, FlashStatus};
    pub use crate::traits::{
        CameraDeviceHal, CameraHost, DeviceCallback, HostCallback, HostConnector,
        PermissionBroker, StreamOperator, StreamOperatorCallback,
    };
}

// 版本与构建信息常量
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
