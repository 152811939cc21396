//! 仿真后端
//!
//! 不依赖任何硬件：Host、设备、Stream Operator 与权限子系统全部在内存里实现，
//! 每次驱动调用都写入调用日志，并支持一次性故障注入。

pub mod buffer;
pub mod hal;
pub mod permission;

pub use buffer::SimBufferProducer;
pub use hal::{FaultPoint, HalCall, SimHost, SimHostConnector};
pub use permission::SimPermissionBroker;

use camsvc_core::metadata::{tags, CameraMetadata};

/// 构造一份常见的 Ability：朝向、传感器角度、静音与镜像支持
pub fn sample_ability(position: u8, sensor_orientation: i32) -> CameraMetadata {
    let mut meta = CameraMetadata::unbounded();
    let entries: [(u32, &[u8]); 4] = [
        (tags::ABILITY_CAMERA_POSITION, &[position]),
        (tags::ABILITY_CAMERA_TYPE, &[1]),
        (tags::ABILITY_MUTE_MODES, &[0, 1]),
        (tags::CONTROL_CAPTURE_MIRROR_SUPPORTED, &[1]),
    ];
    for (tag, value) in entries {
        // 无容量上限的容器，空表写入不会失败
        let _ = meta.set_u8(tag, value);
    }
    let _ = meta.set_i32(tags::SENSOR_ORIENTATION, &[sensor_orientation]);
    meta
}
