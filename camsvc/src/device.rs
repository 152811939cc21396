use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use camsvc_core::builder::ServiceConfig;
use camsvc_core::descriptor::ResultCallbackMode;
use camsvc_core::error::{CameraError, Result};
use camsvc_core::identity::ClientIdentity;
use camsvc_core::metadata::CameraMetadata;
use camsvc_core::status::{CameraStatus, DeviceError, HalErrorType};
use camsvc_core::traits::{
    CameraDeviceHal, DeviceCallback, PermissionBroker, StreamOperator, StreamOperatorCallback,
};

use crate::callbacks::{DeviceServiceCallback, ReleaseReason, ServiceCallback};
use crate::host_manager::CameraHostManager;
use crate::session::CaptureSession;

struct DeviceInner {
    hal: Option<Arc<dyn CameraDeviceHal>>,
    operator: Option<Arc<dyn StreamOperator>>,
    /// 尚未下发到驱动的 settings (有容量上限)
    pending: CameraMetadata,
    /// 已成功下发的 settings
    applied: CameraMetadata,
    enabled_results: BTreeSet<u32>,
    owner: Option<Weak<CaptureSession>>,
}

#[derive(Default)]
struct DeviceListeners {
    service: Option<Arc<dyn DeviceServiceCallback>>,
    status: Vec<Weak<dyn ServiceCallback>>,
}

/// 一个物理相机的打开句柄
///
/// 打开/关闭由 `op_lock` 串行化；settings 合并与驱动句柄在 `inner` 里。
/// 回调订阅者单独加锁，转发回调时不持有设备锁。
pub struct CameraDevice {
    camera_id: String,
    creator: ClientIdentity,
    ability: Arc<CameraMetadata>,
    host_manager: Arc<CameraHostManager>,
    permissions: Arc<dyn PermissionBroker>,
    camera_permission: String,
    settings_capacity: (usize, usize),
    op_lock: Mutex<()>,
    inner: Mutex<DeviceInner>,
    listeners: Mutex<DeviceListeners>,
    self_ref: Weak<CameraDevice>,
}

impl fmt::Debug for CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraDevice")
            .field("camera_id", &self.camera_id)
            .field("creator", &self.creator)
            .field("open", &self.is_open())
            .finish()
    }
}

impl CameraDevice {
    pub fn new(
        camera_id: &str,
        creator: ClientIdentity,
        ability: Arc<CameraMetadata>,
        host_manager: Arc<CameraHostManager>,
        permissions: Arc<dyn PermissionBroker>,
        config: &ServiceConfig,
    ) -> Arc<Self> {
        let capacity = (config.settings_item_capacity, config.settings_data_capacity);
        Arc::new_cyclic(|self_ref| Self {
            camera_id: camera_id.to_string(),
            creator,
            ability,
            host_manager,
            permissions,
            camera_permission: config.camera_permission.clone(),
            settings_capacity: capacity,
            op_lock: Mutex::new(()),
            inner: Mutex::new(DeviceInner {
                hal: None,
                operator: None,
                pending: CameraMetadata::new(capacity.0, capacity.1),
                applied: CameraMetadata::unbounded(),
                enabled_results: BTreeSet::new(),
                owner: None,
            }),
            listeners: Mutex::new(DeviceListeners::default()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn creator(&self) -> &ClientIdentity {
        &self.creator
    }

    /// 创建时缓存的 Ability
    pub fn ability(&self) -> Arc<CameraMetadata> {
        self.ability.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().hal.is_some()
    }

    /// 打开相机
    pub fn open(&self, identity: &ClientIdentity) -> Result<()> {
        let mut preempted = Vec::new();
        let opened = self.open_with_owner(identity, None, &mut preempted);
        for session in preempted {
            session.evict(ReleaseReason::Preempted);
        }
        opened
    }

    /// `owner` 是发起打开的会话；属于同一会话的冲突设备只关闭、不抢占
    ///
    /// 被抢占的会话只收集到 `preempted`，由调用方在放开自己的会话锁之后再释放。
    pub(crate) fn open_with_owner(
        &self,
        identity: &ClientIdentity,
        owner: Option<&Arc<CaptureSession>>,
        preempted: &mut Vec<Arc<CaptureSession>>,
    ) -> Result<()> {
        if identity.token_id != self.creator.token_id {
            warn!(camera_id = %self.camera_id, pid = identity.pid, "Open from non-creator rejected");
            return Err(CameraError::OperationNotAllowed(
                "device handle belongs to another client".to_string(),
            ));
        }
        if !self
            .permissions
            .verify_access(identity.token_id, &self.camera_permission)
        {
            return Err(CameraError::permission_denied(&self.camera_permission));
        }
        if self.is_open() {
            if let Some(owner) = owner {
                self.set_owner(Some(Arc::downgrade(owner)));
            }
            return Ok(());
        }

        self.resolve_conflicts(owner, preempted);

        let _guard = self.op_lock.lock();
        if self.is_open() {
            return Ok(());
        }
        let relay: Arc<dyn DeviceCallback> = Arc::new(HalEventRelay {
            device: self.self_ref.clone(),
        });
        let hal = self.host_manager.open_camera_device(&self.camera_id, relay)?;
        {
            let mut inner = self.inner.lock();
            if let Err(e) = self.flush(&hal, &mut inner) {
                drop(inner);
                error!(camera_id = %self.camera_id, error = %e, "Flushing settings on open failed");
                hal.close();
                return Err(e);
            }
            inner.hal = Some(hal);
            if let Some(owner) = owner {
                inner.owner = Some(Arc::downgrade(owner));
            }
        }
        if let Some(me) = self.self_ref.upgrade() {
            self.host_manager.add_live_device(me);
        }
        info!(camera_id = %self.camera_id, pid = identity.pid, "Camera opened");
        self.broadcast_status(CameraStatus::Unavailable);
        Ok(())
    }

    /// 同一时刻只允许一个物理相机处于打开状态
    fn resolve_conflicts(
        &self,
        owner: Option<&Arc<CaptureSession>>,
        preempted: &mut Vec<Arc<CaptureSession>>,
    ) {
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        for other in self.host_manager.detect_conflicts(&self.camera_id, &me) {
            let other_owner = other.owner();
            let same_session = matches!(
                (owner, &other_owner),
                (Some(a), Some(b)) if Arc::ptr_eq(a, b)
            );
            if same_session {
                info!(camera_id = %other.camera_id, "Closing previous device of the same session");
                other.close();
                continue;
            }

            warn!(
                camera_id = %self.camera_id,
                conflict = %other.camera_id,
                pid = other.creator.pid,
                "Camera conflict, preempting open device"
            );
            other.notify_error(DeviceError::DevicePreempted, 0);
            other.close();
            if let Some(session) = other_owner {
                if !preempted.iter().any(|s| Arc::ptr_eq(s, &session)) {
                    preempted.push(session);
                }
            }
        }
    }

    fn flush(&self, hal: &Arc<dyn CameraDeviceHal>, inner: &mut DeviceInner) -> Result<()> {
        if !inner.pending.is_empty() {
            hal.update_settings(&inner.pending)?;
            let pushed = std::mem::replace(&mut inner.pending, self.empty_settings());
            inner.applied = inner.applied.overlaid(&pushed);
        }
        if !inner.enabled_results.is_empty() {
            let tags: Vec<u32> = inner.enabled_results.iter().copied().collect();
            hal.enable_result(&tags)?;
        }
        Ok(())
    }

    fn empty_settings(&self) -> CameraMetadata {
        CameraMetadata::new(self.settings_capacity.0, self.settings_capacity.1)
    }

    /// 关闭相机，可重复调用
    pub fn close(&self) {
        self.close_with(true);
    }

    /// Host 掉线时关闭；可用状态由 Host 管理器统一广播
    pub(crate) fn force_close(&self) {
        self.close_with(false);
    }

    fn close_with(&self, broadcast: bool) {
        let _guard = self.op_lock.lock();
        let hal = {
            let mut inner = self.inner.lock();
            inner.operator = None;
            inner.hal.take()
        };
        let Some(hal) = hal else {
            return;
        };
        hal.close();
        self.host_manager.remove_live_device(self);
        info!(camera_id = %self.camera_id, broadcast, "Camera closed");
        if broadcast {
            self.broadcast_status(CameraStatus::Available);
        }
    }

    /// 合并 settings；已打开时立即下发
    ///
    /// 任何一个条目合并失败都让整个调用失败，不会部分下发。
    pub fn update_settings(&self, delta: &CameraMetadata) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pending.merge_from(delta)?;
        let Some(hal) = inner.hal.clone() else {
            debug!(camera_id = %self.camera_id, "Settings buffered until open");
            return Ok(());
        };
        hal.update_settings(&inner.pending).map_err(|status| {
            warn!(camera_id = %self.camera_id, %status, "Update settings failed");
            CameraError::from(status)
        })?;
        let pushed = std::mem::replace(&mut inner.pending, self.empty_settings());
        inner.applied = inner.applied.overlaid(&pushed);
        Ok(())
    }

    /// Ability + 已下发 settings + 待下发 settings 的合成视图
    pub fn settings(&self) -> Arc<CameraMetadata> {
        let inner = self.inner.lock();
        Arc::new(self.ability.overlaid(&inner.applied).overlaid(&inner.pending))
    }

    pub fn pending_settings(&self) -> CameraMetadata {
        self.inner.lock().pending.clone()
    }

    pub fn enable_result(&self, tags: &[u32]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.enabled_results.extend(tags.iter().copied());
        if let Some(hal) = &inner.hal {
            hal.enable_result(tags)?;
        }
        Ok(())
    }

    pub fn disable_result(&self, tags: &[u32]) -> Result<()> {
        let mut inner = self.inner.lock();
        for tag in tags {
            inner.enabled_results.remove(tag);
        }
        if let Some(hal) = &inner.hal {
            hal.disable_result(tags)?;
        }
        Ok(())
    }

    pub fn enabled_results(&self) -> Vec<u32> {
        self.inner.lock().enabled_results.iter().copied().collect()
    }

    pub fn set_result_mode(&self, mode: ResultCallbackMode) -> Result<()> {
        let hal = self
            .inner
            .lock()
            .hal
            .clone()
            .ok_or_else(|| CameraError::invalid_state("camera is not open"))?;
        Ok(hal.set_result_mode(mode)?)
    }

    /// 获取 (并缓存) 驱动的 Stream Operator
    pub(crate) fn stream_operator(
        &self,
        callback: Arc<dyn StreamOperatorCallback>,
    ) -> Result<Arc<dyn StreamOperator>> {
        let mut inner = self.inner.lock();
        if let Some(op) = &inner.operator {
            return Ok(op.clone());
        }
        let hal = inner
            .hal
            .clone()
            .ok_or_else(|| CameraError::invalid_state("camera is not open"))?;
        let op = hal.stream_operator(callback)?;
        inner.operator = Some(op.clone());
        Ok(op)
    }

    /// 当前 Stream Operator (未打开或尚未获取时为空)
    pub(crate) fn current_operator(&self) -> Option<Arc<dyn StreamOperator>> {
        self.inner.lock().operator.clone()
    }

    pub(crate) fn owner(&self) -> Option<Arc<CaptureSession>> {
        self.inner.lock().owner.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_owner(&self, owner: Option<Weak<CaptureSession>>) {
        self.inner.lock().owner = owner;
    }

    // --- 回调 ---

    pub fn set_callback(&self, callback: Arc<dyn DeviceServiceCallback>) {
        self.listeners.lock().service = Some(callback);
    }

    pub fn clear_callback(&self) {
        self.listeners.lock().service = None;
    }

    /// 整体替换状态订阅者集合
    pub fn set_status_callbacks(&self, subscribers: Vec<Weak<dyn ServiceCallback>>) {
        self.listeners.lock().status = subscribers;
    }

    pub(crate) fn notify_error(&self, error: DeviceError, vendor_code: i32) {
        let callback = self.listeners.lock().service.clone();
        if let Some(cb) = callback {
            cb.on_error(error, vendor_code);
        }
    }

    fn relay_result(&self, timestamp: u64, result: &CameraMetadata) {
        let callback = self.listeners.lock().service.clone();
        if let Some(cb) = callback {
            cb.on_result(timestamp, result);
        }
    }

    fn broadcast_status(&self, status: CameraStatus) {
        let subscribers: Vec<_> = self
            .listeners
            .lock()
            .status
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for cb in subscribers {
            cb.on_camera_status(&self.camera_id, status);
        }
    }
}

/// 驱动回调适配器，只弱引用设备
struct HalEventRelay {
    device: Weak<CameraDevice>,
}

impl DeviceCallback for HalEventRelay {
    fn on_error(&self, error: HalErrorType, vendor_code: i32) {
        let Some(device) = self.device.upgrade() else {
            return;
        };
        error!(camera_id = %device.camera_id, ?error, vendor_code, "Device error from driver");
        device.notify_error(error.into(), vendor_code);
    }

    fn on_result(&self, timestamp: u64, result: &CameraMetadata) {
        if let Some(device) = self.device.upgrade() {
            device.relay_result(timestamp, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsvc_core::error::DriverStatus;
    use camsvc_core::metadata::tags;
    use camsvc_simulation::{
        sample_ability, FaultPoint, HalCall, SimHost, SimHostConnector, SimPermissionBroker,
    };

    struct Fixture {
        host: SimHost,
        manager: Arc<CameraHostManager>,
        permissions: Arc<SimPermissionBroker>,
        config: ServiceConfig,
    }

    fn fixture() -> Fixture {
        let host = SimHost::new("camera_service")
            .with_camera("0", sample_ability(1, 90))
            .with_camera("1", sample_ability(2, 270));
        let connector = Arc::new(SimHostConnector::new().with_host(host.clone()));
        let manager = CameraHostManager::new(connector);
        manager.init(&["camera_service".to_string()]);
        Fixture {
            host,
            manager,
            permissions: Arc::new(SimPermissionBroker::new()),
            config: ServiceConfig::new().settings_capacity(4, 64),
        }
    }

    fn device(f: &Fixture, id: &str, who: ClientIdentity) -> Arc<CameraDevice> {
        let ability = f.manager.get_ability(id).unwrap();
        CameraDevice::new(
            id,
            who,
            ability,
            f.manager.clone(),
            f.permissions.clone(),
            &f.config,
        )
    }

    fn client(pid: i32) -> ClientIdentity {
        ClientIdentity::new(pid, 1000 + pid as u32, 500 + pid as u32)
    }

    #[test]
    fn open_rejects_foreign_identity() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        let err = dev.open(&client(2)).unwrap_err();
        assert!(matches!(err, CameraError::OperationNotAllowed(_)));
        assert!(!dev.is_open());
    }

    #[test]
    fn open_requires_permission() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        f.permissions
            .revoke(client(1).token_id, &f.config.camera_permission);
        let err = dev.open(&client(1)).unwrap_err();
        assert!(matches!(err, CameraError::PermissionDenied { .. }));
    }

    #[test]
    fn settings_buffered_before_open_are_flushed() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        let mut delta = CameraMetadata::unbounded();
        delta.set_u8(tags::CONTROL_MUTE_MODE, &[1]).unwrap();
        dev.update_settings(&delta).unwrap();
        dev.enable_result(&[tags::SENSOR_ORIENTATION]).unwrap();
        assert_eq!(f.host.count_calls(|c| matches!(c, HalCall::UpdateSettings(_))), 0);

        dev.open(&client(1)).unwrap();
        assert!(dev.pending_settings().is_empty());
        let pushed = f.host.pushed_settings("0").unwrap();
        assert_eq!(pushed.get_u8(tags::CONTROL_MUTE_MODE), Some(1));
        assert_eq!(f.host.count_calls(|c| matches!(c, HalCall::EnableResult(..))), 1);
        assert_eq!(dev.settings().get_u8(tags::CONTROL_MUTE_MODE), Some(1));
    }

    #[test]
    fn failed_open_leaves_device_closed() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        f.host.fail_next(FaultPoint::Open, DriverStatus::Timeout);
        let err = dev.open(&client(1)).unwrap_err();
        assert_eq!(err, CameraError::DeviceRequestTimeout);
        assert!(!dev.is_open());
        assert!(f.manager.live_devices().is_empty());
    }

    #[test]
    fn failed_push_keeps_pending_settings() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        dev.open(&client(1)).unwrap();

        let mut delta = CameraMetadata::unbounded();
        delta.set_i32(tags::JPEG_ORIENTATION, &[90]).unwrap();
        f.host.fail_next(FaultPoint::UpdateSettings, DriverStatus::DeviceError);
        assert!(dev.update_settings(&delta).is_err());
        assert_eq!(dev.pending_settings().get_i32(tags::JPEG_ORIENTATION), Some(90));

        dev.update_settings(&CameraMetadata::unbounded()).unwrap();
        assert!(dev.pending_settings().is_empty());
    }

    #[test]
    fn merge_overflow_is_a_hard_failure() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        let mut delta = CameraMetadata::unbounded();
        for tag in 0..5u32 {
            delta.set_u8(0x9000 + tag, &[1]).unwrap();
        }
        let err = dev.update_settings(&delta).unwrap_err();
        assert!(matches!(err, CameraError::Metadata(_)));
        assert!(dev.pending_settings().is_empty());
    }

    #[test]
    fn close_is_idempotent_and_detaches() {
        let f = fixture();
        let dev = device(&f, "0", client(1));
        dev.open(&client(1)).unwrap();
        assert_eq!(f.manager.live_devices().len(), 1);

        dev.close();
        dev.close();
        assert!(!dev.is_open());
        assert!(f.manager.live_devices().is_empty());
        assert_eq!(f.host.count_calls(|c| matches!(c, HalCall::CloseCamera(_))), 1);
    }

    #[test]
    fn opening_another_camera_closes_the_open_one() {
        let f = fixture();
        let first = device(&f, "0", client(1));
        let second = device(&f, "1", client(2));
        first.open(&client(1)).unwrap();

        second.open(&client(2)).unwrap();
        assert!(!first.is_open());
        assert!(second.is_open());
        assert!(!f.host.is_open("0"));
    }
}
