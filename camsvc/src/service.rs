use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use camsvc_core::ability::{CameraAbility, CameraFeatures};
use camsvc_core::buffer::BufferProducer;
use camsvc_core::builder::ServiceConfig;
use camsvc_core::error::{CameraError, Result};
use camsvc_core::identity::{ClientIdentity, Pid};
use camsvc_core::metadata::{tags, CameraMetadata};
use camsvc_core::pixel_format::PixelFormat;
use camsvc_core::status::{CameraStatus, FlashStatus, HostServiceStatus};
use camsvc_core::traits::{HostConnector, PermissionBroker};

use crate::callbacks::{MuteCallback, ReleaseReason, ServiceCallback};
use crate::device::CameraDevice;
use crate::host_manager::{CameraHostManager, HostStatusListener};
use crate::session::{CaptureSession, SessionRegistry};
use crate::stream::{CaptureIdAllocator, OutputStream, RepeatKind};

#[derive(Default)]
struct ServiceState {
    callbacks: HashMap<Pid, Arc<dyn ServiceCallback>>,
    mute_callbacks: HashMap<Pid, Arc<dyn MuteCallback>>,
    /// 每个进程创建过的设备
    devices: HashMap<Pid, Vec<Weak<CameraDevice>>>,
    muted: bool,
}

/// 相机服务入口
///
/// 把客户端请求分派到 Host 注册表、设备与会话；本身只保存每个进程的回调和设备列表。
pub struct CameraService {
    config: ServiceConfig,
    host_manager: Arc<CameraHostManager>,
    permissions: Arc<dyn PermissionBroker>,
    registry: Arc<SessionRegistry>,
    capture_ids: Arc<CaptureIdAllocator>,
    state: Mutex<ServiceState>,
}

impl CameraService {
    pub fn new(
        config: ServiceConfig,
        connector: Arc<dyn HostConnector>,
        permissions: Arc<dyn PermissionBroker>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            config,
            host_manager: CameraHostManager::new(connector),
            permissions,
            registry: SessionRegistry::new(),
            capture_ids: Arc::new(CaptureIdAllocator::new()),
            state: Mutex::new(ServiceState::default()),
        });
        let listener: Arc<dyn HostStatusListener> = service.clone();
        service
            .host_manager
            .set_status_listener(Arc::downgrade(&listener));
        service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn host_manager(&self) -> &Arc<CameraHostManager> {
        &self.host_manager
    }

    pub fn session_registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 连接配置中的 Host
    pub fn start(&self) {
        self.host_manager.init(&self.config.hosts);
        info!(hosts = ?self.config.hosts, "Camera service started");
    }

    /// 释放所有会话并断开 Host
    pub fn stop(&self) {
        self.registry.release_all(ReleaseReason::ServiceStopped);
        self.host_manager.deinit();
        info!("Camera service stopped");
    }

    pub fn on_host_status(&self, host_name: &str, status: HostServiceStatus) {
        self.host_manager.on_host_status(host_name, status);
    }

    /// 所有相机及其 Ability
    pub fn get_cameras(&self) -> Vec<(String, Arc<CameraMetadata>)> {
        let mut cameras = Vec::new();
        for id in self.host_manager.get_cameras() {
            match self.host_manager.get_ability(&id) {
                Ok(ability) => {
                    let view = CameraAbility::new(&ability);
                    info!(
                        camera_id = %id,
                        position = ?view.position(),
                        camera_type = ?view.camera_type(),
                        connection = ?view.connection_type(),
                        mirror = view.features().contains(CameraFeatures::MIRROR),
                        "Camera found"
                    );
                    cameras.push((id, ability));
                }
                Err(e) => warn!(camera_id = %id, error = %e, "Ability unavailable, skipped"),
            }
        }
        cameras
    }

    pub fn create_camera_device(
        &self,
        identity: &ClientIdentity,
        camera_id: &str,
    ) -> Result<Arc<CameraDevice>> {
        let permission = &self.config.camera_permission;
        if !self.permissions.verify_access(identity.token_id, permission)
            || !self.permissions.is_usage_allowed(identity.token_id, permission)
        {
            warn!(pid = identity.pid, camera_id, "Create camera device denied");
            return Err(CameraError::permission_denied(permission));
        }
        let ability = self.host_manager.get_ability(camera_id)?;
        let supports_mute = CameraAbility::new(&ability)
            .features()
            .contains(CameraFeatures::MUTE);
        let device = CameraDevice::new(
            camera_id,
            *identity,
            ability,
            self.host_manager.clone(),
            self.permissions.clone(),
            &self.config,
        );

        let mut state = self.state.lock();
        if state.muted && supports_mute {
            if let Err(e) = device.update_settings(&mute_settings(true)) {
                warn!(camera_id, error = %e, "Applying mute to new device failed");
            }
        }
        device.set_status_callbacks(Self::status_subscribers(&state));
        let devices = state.devices.entry(identity.pid).or_default();
        devices.retain(|d| d.strong_count() > 0);
        devices.push(Arc::downgrade(&device));
        info!(pid = identity.pid, camera_id, "Camera device created");
        Ok(device)
    }

    /// 创建会话；同一进程已有的会话会被取代
    pub fn create_capture_session(&self, identity: &ClientIdentity) -> Arc<CaptureSession> {
        let session = CaptureSession::new(
            *identity,
            &self.config,
            self.permissions.clone(),
            &self.registry,
        );
        self.registry.install(session.clone());
        info!(pid = identity.pid, session = session.id(), "Capture session created");
        session
    }

    // --- 输出流工厂 ---

    pub fn create_preview_output(
        &self,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Arc<OutputStream>> {
        let producer = require_producer(producer)?;
        require_size(width, height)?;
        Ok(OutputStream::new_repeat(
            RepeatKind::Preview,
            Some(producer),
            format,
            width,
            height,
            self.capture_ids.clone(),
        ))
    }

    /// 延迟预览：Surface 稍后通过 `add_deferred_surface` 提供
    pub fn create_deferred_preview_output(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Arc<OutputStream>> {
        require_size(width, height)?;
        Ok(OutputStream::new_repeat(
            RepeatKind::Preview,
            None,
            format,
            width,
            height,
            self.capture_ids.clone(),
        ))
    }

    pub fn create_video_output(
        &self,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Arc<OutputStream>> {
        let producer = require_producer(producer)?;
        require_size(width, height)?;
        Ok(OutputStream::new_repeat(
            RepeatKind::Video,
            Some(producer),
            format,
            width,
            height,
            self.capture_ids.clone(),
        ))
    }

    pub fn create_photo_output(
        &self,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Arc<OutputStream>> {
        let producer = require_producer(producer)?;
        require_size(width, height)?;
        Ok(OutputStream::new_capture(
            producer,
            format,
            width,
            height,
            self.capture_ids.clone(),
        ))
    }

    pub fn create_metadata_output(
        &self,
        producer: Option<Arc<dyn BufferProducer>>,
        format: PixelFormat,
    ) -> Result<Arc<OutputStream>> {
        let producer = require_producer(producer)?;
        Ok(OutputStream::new_metadata(
            producer,
            format,
            self.capture_ids.clone(),
        ))
    }

    // --- 进程级回调 ---

    /// 替换进程的服务回调，并把完整订阅者集合重新推给所有设备
    pub fn set_callback(&self, pid: Pid, callback: Arc<dyn ServiceCallback>) {
        let mut state = self.state.lock();
        state.callbacks.insert(pid, callback);
        Self::refresh_subscribers(&state);
    }

    pub fn unset_callback(&self, pid: Pid) {
        let mut state = self.state.lock();
        if state.callbacks.remove(&pid).is_some() {
            Self::refresh_subscribers(&state);
        }
    }

    fn status_subscribers(state: &ServiceState) -> Vec<Weak<dyn ServiceCallback>> {
        state.callbacks.values().map(Arc::downgrade).collect()
    }

    fn refresh_subscribers(state: &ServiceState) {
        let subscribers = Self::status_subscribers(state);
        for device in state.devices.values().flatten().filter_map(Weak::upgrade) {
            device.set_status_callbacks(subscribers.clone());
        }
    }

    /// 客户端进程退出：释放会话、关闭其设备、注销回调
    pub fn on_client_died(&self, pid: Pid) {
        warn!(pid, "Client died, cleaning up");
        if let Some(session) = self.registry.get(pid) {
            session.release_forced(ReleaseReason::ClientDied);
        }
        let devices = {
            let mut state = self.state.lock();
            state.mute_callbacks.remove(&pid);
            state.devices.remove(&pid).unwrap_or_default()
        };
        for device in devices.iter().filter_map(Weak::upgrade) {
            device.clear_callback();
            device.close();
        }
        self.unset_callback(pid);
    }

    // --- 静音 ---

    /// 对所有支持静音的设备下发静音模式；任何一个失败都恢复原设置
    pub fn mute_camera(&self, identity: &ClientIdentity, muted: bool) -> Result<()> {
        let permission = &self.config.manage_config_permission;
        if !self.permissions.verify_access(identity.token_id, permission) {
            return Err(CameraError::permission_denied(permission));
        }
        let (targets, previous) = {
            let state = self.state.lock();
            if state.muted == muted {
                return Ok(());
            }
            let targets: Vec<_> = state
                .devices
                .values()
                .flatten()
                .filter_map(Weak::upgrade)
                .filter(|d| {
                    CameraAbility::new(&d.ability())
                        .features()
                        .contains(CameraFeatures::MUTE)
                })
                .collect();
            (targets, state.muted)
        };

        let mut applied: Vec<&Arc<CameraDevice>> = Vec::new();
        for device in &targets {
            if let Err(e) = device.update_settings(&mute_settings(muted)) {
                error!(camera_id = %device.camera_id(), error = %e, "Mute failed, restoring");
                for done in applied {
                    if let Err(e) = done.update_settings(&mute_settings(previous)) {
                        warn!(camera_id = %done.camera_id(), error = %e, "Restoring mute mode failed");
                    }
                }
                return Err(e);
            }
            applied.push(device);
        }

        let callbacks: Vec<_> = {
            let mut state = self.state.lock();
            state.muted = muted;
            state.mute_callbacks.values().cloned().collect()
        };
        info!(muted, devices = targets.len(), "Camera mute changed");
        for cb in callbacks {
            cb.on_camera_mute(muted);
        }
        Ok(())
    }

    pub fn is_camera_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn set_mute_callback(&self, pid: Pid, callback: Arc<dyn MuteCallback>) {
        self.state.lock().mute_callbacks.insert(pid, callback);
    }

    pub fn set_flashlight(&self, camera_id: &str, enable: bool) -> Result<()> {
        self.host_manager.set_flashlight(camera_id, enable)
    }

    fn service_callbacks(&self) -> Vec<Arc<dyn ServiceCallback>> {
        self.state.lock().callbacks.values().cloned().collect()
    }
}

impl HostStatusListener for CameraService {
    fn on_camera_status(&self, camera_id: &str, status: CameraStatus) {
        for cb in self.service_callbacks() {
            cb.on_camera_status(camera_id, status);
        }
    }

    fn on_flashlight_status(&self, camera_id: &str, status: FlashStatus) {
        for cb in self.service_callbacks() {
            cb.on_flashlight_status(camera_id, status);
        }
    }
}

fn mute_settings(muted: bool) -> CameraMetadata {
    let mut meta = CameraMetadata::unbounded();
    // 单条目写入空容器不会失败
    let _ = meta.set_u8(tags::CONTROL_MUTE_MODE, &[u8::from(muted)]);
    meta
}

fn require_producer(
    producer: Option<Arc<dyn BufferProducer>>,
) -> Result<Arc<dyn BufferProducer>> {
    producer.ok_or_else(|| CameraError::invalid_arg("buffer producer is null"))
}

fn require_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(CameraError::invalid_arg(format!(
            "invalid output size {}x{}",
            width, height
        )));
    }
    Ok(())
}
