//! 服务状态快照 (用于诊断输出)

use camsvc_core::ability::{CameraAbility, CameraFeatures, CameraPosition, CameraType, ConnectionType};
use camsvc_core::identity::Pid;
use camsvc_core::pixel_format::PixelFormat;

use crate::service::CameraService;
use crate::session::SessionState;
use crate::stream::StreamKind;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct CameraDump {
    pub camera_id: String,
    pub position: CameraPosition,
    pub camera_type: CameraType,
    pub connection: ConnectionType,
    pub sensor_orientation: i32,
    pub mirror_supported: bool,
    pub mute_supported: bool,
    pub open: bool,
    /// 打开该相机的会话 ID
    pub owner_session: Option<u64>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct StreamDump {
    pub kind: StreamKind,
    pub stream_id: Option<i32>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub started: bool,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SessionDump {
    pub session_id: u64,
    pub pid: Pid,
    pub uid: u32,
    pub state: SessionState,
    pub released: bool,
    pub camera_id: Option<String>,
    pub streams: Vec<StreamDump>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ServiceDump {
    pub muted: bool,
    /// 当前打开的设备数
    pub active_devices: usize,
    pub cameras: Vec<CameraDump>,
    pub sessions: Vec<SessionDump>,
}

impl ServiceDump {
    #[cfg(feature = "serialize")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl CameraService {
    /// 采集当前所有相机与会话的快照
    pub fn dump(&self) -> ServiceDump {
        let live = self.host_manager().live_devices();
        let cameras = self
            .host_manager()
            .get_cameras()
            .into_iter()
            .filter_map(|camera_id| {
                let ability = self.host_manager().get_ability(&camera_id).ok()?;
                let view = CameraAbility::new(&ability);
                let device = live.iter().find(|d| d.camera_id() == camera_id);
                Some(CameraDump {
                    position: view.position(),
                    camera_type: view.camera_type(),
                    connection: view.connection_type(),
                    sensor_orientation: view.sensor_orientation(),
                    mirror_supported: view.features().contains(CameraFeatures::MIRROR),
                    mute_supported: view.features().contains(CameraFeatures::MUTE),
                    open: device.is_some(),
                    owner_session: device.and_then(|d| d.owner()).map(|s| s.id()),
                    camera_id,
                })
            })
            .collect();

        let sessions = self
            .session_registry()
            .sessions()
            .into_iter()
            .map(|session| SessionDump {
                session_id: session.id(),
                pid: session.identity().pid,
                uid: session.identity().uid,
                state: session.state(),
                released: session.is_released(),
                camera_id: session.bound_device().map(|d| d.camera_id().to_string()),
                streams: session
                    .committed_streams()
                    .iter()
                    .map(|stream| {
                        let (width, height) = stream.size();
                        StreamDump {
                            kind: stream.kind(),
                            stream_id: stream.stream_id(),
                            format: stream.format(),
                            width,
                            height,
                            started: stream.as_repeat().map_or(false, |r| r.is_started()),
                        }
                    })
                    .collect(),
            })
            .collect();

        ServiceDump {
            muted: self.is_camera_muted(),
            active_devices: live.len(),
            cameras,
            sessions,
        }
    }
}
