use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use camsvc_core::error::{CameraError, Result};
use camsvc_core::metadata::CameraMetadata;
use camsvc_core::status::{
    CameraStatus, DeviceError, FlashStatus, HalCameraEvent, HalCameraStatus, HalFlashlightStatus,
    HostServiceStatus,
};
use camsvc_core::traits::{CameraDeviceHal, CameraHost, DeviceCallback, HostCallback, HostConnector};

use crate::callbacks::ReleaseReason;
use crate::device::CameraDevice;

/// Host 层状态变化的接收方 (服务层)
pub trait HostStatusListener: Send + Sync {
    fn on_camera_status(&self, camera_id: &str, status: CameraStatus);
    fn on_flashlight_status(&self, camera_id: &str, status: FlashStatus);
}

/// 一个已连接的 Host
struct HostEntry {
    name: String,
    host: Arc<dyn CameraHost>,
    cameras: Mutex<Vec<String>>,
    abilities: Mutex<HashMap<String, Arc<CameraMetadata>>>,
    /// 同一 Host 上的打开请求串行执行
    open_lock: Mutex<()>,
}

impl HostEntry {
    fn has_camera(&self, camera_id: &str) -> bool {
        self.cameras.lock().iter().any(|id| id == camera_id)
    }
}

/// Host 注册表
///
/// Host 列表与活动设备表各用一把锁，只在查找/增删时持有，从不跨驱动调用。
pub struct CameraHostManager {
    connector: Arc<dyn HostConnector>,
    hosts: Mutex<Vec<Arc<HostEntry>>>,
    default_hosts: Mutex<Vec<String>>,
    live_devices: Mutex<Vec<Arc<CameraDevice>>>,
    listener: Mutex<Option<Weak<dyn HostStatusListener>>>,
    self_ref: Weak<CameraHostManager>,
}

impl CameraHostManager {
    pub fn new(connector: Arc<dyn HostConnector>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            connector,
            hosts: Mutex::new(Vec::new()),
            default_hosts: Mutex::new(Vec::new()),
            live_devices: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    pub fn set_status_listener(&self, listener: Weak<dyn HostStatusListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// 连接配置里的 Host；单个 Host 失败只记日志
    pub fn init(&self, host_names: &[String]) {
        *self.default_hosts.lock() = host_names.to_vec();
        for name in host_names {
            if let Err(e) = self.add_host(name) {
                warn!(host = %name, error = %e, "Camera host not available yet");
            }
        }
    }

    /// 关闭所有设备并断开所有 Host
    pub fn deinit(&self) {
        let devices: Vec<_> = self.live_devices.lock().clone();
        for device in devices {
            device.close();
        }
        self.hosts.lock().clear();
        info!("Camera host manager torn down");
    }

    pub fn on_host_status(&self, host_name: &str, status: HostServiceStatus) {
        match status {
            HostServiceStatus::Started => {
                if let Err(e) = self.add_host(host_name) {
                    error!(host = %host_name, error = %e, "Failed to attach camera host");
                }
            }
            HostServiceStatus::Stopped => self.remove_host(host_name),
        }
    }

    pub fn add_host(&self, host_name: &str) -> Result<()> {
        if self.find_host_by_name(host_name).is_some() {
            return Ok(());
        }
        let host = self.connector.connect(host_name)?;
        host.set_callback(Arc::new(HostEventRelay {
            manager: self.self_ref.clone(),
            host_name: host_name.to_string(),
        }));
        let cameras = host.camera_ids()?;
        let entry = Arc::new(HostEntry {
            name: host_name.to_string(),
            host,
            cameras: Mutex::new(cameras.clone()),
            abilities: Mutex::new(HashMap::new()),
            open_lock: Mutex::new(()),
        });
        self.hosts.lock().push(entry);
        info!(host = %host_name, cameras = cameras.len(), "Camera host attached");
        for id in &cameras {
            self.notify_status(id, CameraStatus::Available);
        }
        Ok(())
    }

    /// Host 离线：强制关闭其设备并广播 Unavailable
    pub fn remove_host(&self, host_name: &str) {
        let entry = {
            let mut hosts = self.hosts.lock();
            let Some(pos) = hosts.iter().position(|h| h.name == host_name) else {
                return;
            };
            hosts.remove(pos)
        };
        let cameras = entry.cameras.lock().clone();
        warn!(host = %host_name, cameras = cameras.len(), "Camera host detached");
        for id in &cameras {
            self.force_close(id);
        }
        for id in &cameras {
            self.notify_status(id, CameraStatus::Unavailable);
        }
    }

    /// 相机掉线：设备收到断开错误，持有它的会话一并释放
    fn force_close(&self, camera_id: &str) {
        let devices: Vec<_> = self
            .live_devices
            .lock()
            .iter()
            .filter(|d| d.camera_id() == camera_id)
            .cloned()
            .collect();
        for device in devices {
            device.notify_error(DeviceError::DeviceDisconnected, 0);
            let owner = device.owner();
            device.force_close();
            if let Some(session) = owner {
                session.evict(ReleaseReason::DeviceDisconnected);
            }
        }
    }

    /// 全部相机 ID；Host 列表为空时重新尝试连接默认 Host
    pub fn get_cameras(&self) -> Vec<String> {
        if self.hosts.lock().is_empty() {
            let defaults = self.default_hosts.lock().clone();
            for name in &defaults {
                if let Err(e) = self.add_host(name) {
                    debug!(host = %name, error = %e, "Lazy host attach failed");
                }
            }
        }
        let hosts: Vec<_> = self.hosts.lock().clone();
        hosts
            .iter()
            .flat_map(|h| h.cameras.lock().clone())
            .collect()
    }

    /// 读取 Ability，首次从驱动获取后缓存
    pub fn get_ability(&self, camera_id: &str) -> Result<Arc<CameraMetadata>> {
        let entry = self.find_host(camera_id)?;
        if let Some(cached) = entry.abilities.lock().get(camera_id) {
            return Ok(cached.clone());
        }
        let ability = Arc::new(entry.host.camera_ability(camera_id)?);
        entry
            .abilities
            .lock()
            .insert(camera_id.to_string(), ability.clone());
        Ok(ability)
    }

    /// 把打开请求路由到拥有该相机的 Host
    pub fn open_camera_device(
        &self,
        camera_id: &str,
        callback: Arc<dyn DeviceCallback>,
    ) -> Result<Arc<dyn CameraDeviceHal>> {
        let entry = self.find_host(camera_id)?;
        let _guard = entry.open_lock.lock();
        entry.host.open_camera(camera_id, callback).map_err(|status| {
            error!(camera_id, host = %entry.name, %status, "Open camera failed");
            CameraError::from(status)
        })
    }

    /// 返回除 `requester` 之外所有已打开的设备
    ///
    /// 调用方负责在继续打开之前关闭它们。
    pub fn detect_conflicts(
        &self,
        camera_id: &str,
        requester: &Arc<CameraDevice>,
    ) -> Vec<Arc<CameraDevice>> {
        let conflicts: Vec<_> = self
            .live_devices
            .lock()
            .iter()
            .filter(|d| !Arc::ptr_eq(d, requester))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            debug!(camera_id, count = conflicts.len(), "Open conflicts detected");
        }
        conflicts
    }

    pub fn set_flashlight(&self, camera_id: &str, enable: bool) -> Result<()> {
        let entry = self.find_host(camera_id)?;
        Ok(entry.host.set_flashlight(camera_id, enable)?)
    }

    pub fn live_devices(&self) -> Vec<Arc<CameraDevice>> {
        self.live_devices.lock().clone()
    }

    pub(crate) fn add_live_device(&self, device: Arc<CameraDevice>) {
        let mut devices = self.live_devices.lock();
        if !devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
            devices.push(device);
        }
    }

    pub(crate) fn remove_live_device(&self, device: &CameraDevice) {
        self.live_devices
            .lock()
            .retain(|d| !std::ptr::eq(Arc::as_ptr(d), device));
    }

    fn find_host_by_name(&self, name: &str) -> Option<Arc<HostEntry>> {
        self.hosts.lock().iter().find(|h| h.name == name).cloned()
    }

    fn find_host(&self, camera_id: &str) -> Result<Arc<HostEntry>> {
        self.hosts
            .lock()
            .iter()
            .find(|h| h.has_camera(camera_id))
            .cloned()
            .ok_or_else(|| CameraError::invalid_arg(format!("unknown camera id {}", camera_id)))
    }

    fn notify_status(&self, camera_id: &str, status: CameraStatus) {
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        if let Some(l) = listener {
            l.on_camera_status(camera_id, status);
        }
    }

    fn notify_flash(&self, camera_id: &str, status: FlashStatus) {
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        if let Some(l) = listener {
            l.on_flashlight_status(camera_id, status);
        }
    }

    // --- Host 回调 ---

    fn handle_camera_status(&self, host_name: &str, camera_id: &str, status: HalCameraStatus) {
        let status = match status {
            HalCameraStatus::Available => {
                if let Some(entry) = self.find_host_by_name(host_name) {
                    let mut cameras = entry.cameras.lock();
                    if !cameras.iter().any(|id| id == camera_id) {
                        cameras.push(camera_id.to_string());
                    }
                }
                CameraStatus::Available
            }
            HalCameraStatus::Unavailable => CameraStatus::Unavailable,
        };
        self.notify_status(camera_id, status);
    }

    fn handle_camera_event(&self, host_name: &str, camera_id: &str, event: HalCameraEvent) {
        let Some(entry) = self.find_host_by_name(host_name) else {
            return;
        };
        match event {
            HalCameraEvent::DeviceAdded => {
                {
                    let mut cameras = entry.cameras.lock();
                    if !cameras.iter().any(|id| id == camera_id) {
                        cameras.push(camera_id.to_string());
                    }
                }
                info!(host = %host_name, camera_id, "Camera added");
                self.notify_status(camera_id, CameraStatus::Appear);
            }
            HalCameraEvent::DeviceRemoved => {
                entry.cameras.lock().retain(|id| id != camera_id);
                entry.abilities.lock().remove(camera_id);
                info!(host = %host_name, camera_id, "Camera removed");
                self.force_close(camera_id);
                self.notify_status(camera_id, CameraStatus::Disappear);
            }
        }
    }
}

/// Host 回调适配器，只弱引用管理器
struct HostEventRelay {
    manager: Weak<CameraHostManager>,
    host_name: String,
}

impl HostCallback for HostEventRelay {
    fn on_camera_status(&self, camera_id: &str, status: HalCameraStatus) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_camera_status(&self.host_name, camera_id, status);
        }
    }

    fn on_flashlight_status(&self, camera_id: &str, status: HalFlashlightStatus) {
        if let Some(manager) = self.manager.upgrade() {
            manager.notify_flash(camera_id, status.into());
        }
    }

    fn on_camera_event(&self, camera_id: &str, event: HalCameraEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_camera_event(&self.host_name, camera_id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsvc_simulation::{sample_ability, SimHost, SimHostConnector};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, CameraStatus)>>,
    }

    impl HostStatusListener for Recorder {
        fn on_camera_status(&self, camera_id: &str, status: CameraStatus) {
            self.events.lock().push((camera_id.to_string(), status));
        }

        fn on_flashlight_status(&self, _camera_id: &str, _status: FlashStatus) {}
    }

    fn setup() -> (SimHost, Arc<SimHostConnector>, Arc<CameraHostManager>, Arc<Recorder>) {
        let host = SimHost::new("camera_service").with_camera("0", sample_ability(1, 90));
        let connector = Arc::new(SimHostConnector::new().with_host(host.clone()));
        let manager = CameraHostManager::new(connector.clone());
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn HostStatusListener> = recorder.clone();
        manager.set_status_listener(Arc::downgrade(&listener));
        manager.init(&["camera_service".to_string()]);
        (host, connector, manager, recorder)
    }

    #[test]
    fn ability_is_fetched_once() {
        let (host, _connector, manager, _recorder) = setup();
        let a = manager.get_ability("0").unwrap();
        let b = manager.get_ability("0").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.ability_queries(), 1);
    }

    #[test]
    fn unknown_camera_is_invalid_arg() {
        let (_host, _connector, manager, _recorder) = setup();
        assert!(matches!(
            manager.get_ability("9"),
            Err(CameraError::InvalidArg(_))
        ));
        assert!(matches!(
            manager.set_flashlight("9", true),
            Err(CameraError::InvalidArg(_))
        ));
    }

    #[test]
    fn host_attach_and_detach_update_camera_list() {
        let (_host, connector, manager, recorder) = setup();
        let remote = SimHost::new("distributed_camera_service")
            .with_camera("remote-0", sample_ability(0, 0));
        connector.register(remote);

        manager.on_host_status("distributed_camera_service", HostServiceStatus::Started);
        assert_eq!(manager.get_cameras(), vec!["0", "remote-0"]);

        manager.on_host_status("distributed_camera_service", HostServiceStatus::Stopped);
        assert_eq!(manager.get_cameras(), vec!["0"]);
        let events = recorder.events.lock();
        assert!(events.contains(&("remote-0".to_string(), CameraStatus::Available)));
        assert_eq!(
            events.last(),
            Some(&("remote-0".to_string(), CameraStatus::Unavailable))
        );
    }

    #[test]
    fn plug_events_update_cameras() {
        let (host, _connector, manager, recorder) = setup();
        host.plug_camera("usb-1", sample_ability(0, 0));
        assert!(manager.get_cameras().contains(&"usb-1".to_string()));
        assert!(manager.get_ability("usb-1").is_ok());

        host.unplug_camera("usb-1");
        assert!(!manager.get_cameras().contains(&"usb-1".to_string()));
        assert_eq!(
            recorder.events.lock().last(),
            Some(&("usb-1".to_string(), CameraStatus::Disappear))
        );
    }

    #[test]
    fn lazy_attach_when_host_appears_late() {
        let connector = Arc::new(SimHostConnector::new());
        let manager = CameraHostManager::new(connector.clone());
        manager.init(&["camera_service".to_string()]);
        assert!(manager.get_cameras().is_empty());

        connector.register(SimHost::new("camera_service").with_camera("0", sample_ability(1, 0)));
        assert_eq!(manager.get_cameras(), vec!["0"]);
    }
}
