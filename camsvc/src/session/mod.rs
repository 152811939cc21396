//! 采集会话 (CaptureSession)
//!
//! 每个客户端进程一个会话。配置分为两份：已提交的流列表 (`streams`) 与
//! 暂存区 (`staged_*` + `pending_removal`)。`commit_config` 要么整体生效，
//! 要么回滚到 `begin_config` 之前的状态。
//!
//! 锁：`inner` 串行化所有会话操作；已提交流列表单独放在 `streams` 里，
//! 驱动回调线程只读它，不会被长时间的提交阻塞。持有 `inner` 时从不去拿
//! 其他会话的锁：提交中被抢占的会话在本会话锁放开之后才释放。

mod callback;
mod registry;

pub use registry::SessionRegistry;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use camsvc_core::builder::ServiceConfig;
use camsvc_core::descriptor::{OperationMode, StreamInfo};
use camsvc_core::error::{CameraError, Result};
use camsvc_core::identity::ClientIdentity;
use camsvc_core::status::DeviceError;
use camsvc_core::traits::{
    PermissionBroker, PermissionStateObserver, StreamOperatorCallback, UsageStateObserver,
};

use crate::callbacks::{ReleaseReason, SessionCallback};
use crate::device::CameraDevice;
use crate::internal::runtime;
use crate::stream::{LinkSnapshot, OutputStream};
use callback::{PermissionWatcher, StreamEventRouter};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum SessionState {
    Init,
    ConfigInProgress,
    Committed,
}

/// Start 成功后登记的权限监听
struct PermissionWatch {
    state_observer: Arc<dyn PermissionStateObserver>,
}

struct SessionInner {
    state: SessionState,
    /// begin_config 之前的状态，回滚时恢复
    prev_state: SessionState,
    staged_device: Option<Arc<CameraDevice>>,
    staged_streams: Vec<Arc<OutputStream>>,
    /// 标记为待释放的已提交流 ID
    pending_removal: Vec<i32>,
    bound_device: Option<Arc<CameraDevice>>,
    device_release_pending: bool,
    next_stream_id: i32,
    callback: Option<Arc<dyn SessionCallback>>,
    permission_watch: Option<PermissionWatch>,
    released: bool,
}

/// 一次提交前的现场，回滚时使用
struct CommitScene {
    device: Arc<CameraDevice>,
    old_device: Option<Arc<CameraDevice>>,
    device_changed: bool,
    /// 已提交的流需要重新链接 (换设备，或设备已被关闭)
    relink: bool,
    device_was_open: bool,
    old_device_was_open: bool,
    committed: Vec<Arc<OutputStream>>,
    staged: Vec<Arc<OutputStream>>,
    snapshots: Vec<(Arc<OutputStream>, LinkSnapshot)>,
    first_new_id: i32,
}

pub struct CaptureSession {
    id: u64,
    identity: ClientIdentity,
    camera_permission: String,
    background_release_delay: Duration,
    permissions: Arc<dyn PermissionBroker>,
    registry: Weak<SessionRegistry>,
    inner: Mutex<SessionInner>,
    streams: RwLock<Vec<Arc<OutputStream>>>,
    self_ref: Weak<CaptureSession>,
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("pid", &self.identity.pid)
            .field("state", &self.state())
            .field("streams", &self.streams.read().len())
            .finish()
    }
}

impl CaptureSession {
    pub fn new(
        identity: ClientIdentity,
        config: &ServiceConfig,
        permissions: Arc<dyn PermissionBroker>,
        registry: &Arc<SessionRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            camera_permission: config.camera_permission.clone(),
            background_release_delay: Duration::from_millis(config.background_release_delay_ms),
            permissions,
            registry: Arc::downgrade(registry),
            inner: Mutex::new(SessionInner {
                state: SessionState::Init,
                prev_state: SessionState::Init,
                staged_device: None,
                staged_streams: Vec::new(),
                pending_removal: Vec::new(),
                bound_device: None,
                device_release_pending: false,
                next_stream_id: config.first_stream_id,
                callback: None,
                permission_watch: None,
                released: false,
            }),
            streams: RwLock::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    /// 已提交的流 (按提交顺序)
    pub fn committed_streams(&self) -> Vec<Arc<OutputStream>> {
        self.streams.read().clone()
    }

    pub fn bound_device(&self) -> Option<Arc<CameraDevice>> {
        self.inner.lock().bound_device.clone()
    }

    pub fn is_device_release_pending(&self) -> bool {
        self.inner.lock().device_release_pending
    }

    pub fn set_callback(&self, callback: Arc<dyn SessionCallback>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_live(&inner)?;
        inner.callback = Some(callback);
        Ok(())
    }

    fn check_live(inner: &SessionInner) -> Result<()> {
        if inner.released {
            return Err(CameraError::invalid_state("session already released"));
        }
        Ok(())
    }

    fn require_config(inner: &SessionInner) -> Result<()> {
        Self::check_live(inner)?;
        if inner.state != SessionState::ConfigInProgress {
            return Err(CameraError::invalid_state(format!(
                "expected ConfigInProgress, session is {:?}",
                inner.state
            )));
        }
        Ok(())
    }

    // --- 配置阶段 ---

    pub fn begin_config(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_live(&inner)?;
        if inner.state == SessionState::ConfigInProgress {
            return Err(CameraError::invalid_state("config already in progress"));
        }
        inner.prev_state = inner.state;
        inner.staged_device = None;
        inner.staged_streams.clear();
        inner.pending_removal.clear();
        inner.state = SessionState::ConfigInProgress;
        info!(pid = self.identity.pid, prev = ?inner.prev_state, "Begin config");
        Ok(())
    }

    /// 暂存输入设备；只支持一个输入
    pub fn add_input(&self, device: &Arc<CameraDevice>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_config(&inner)?;
        if let Some(bound) = &inner.bound_device {
            if Arc::ptr_eq(bound, device) {
                inner.device_release_pending = false;
                return Ok(());
            }
        }
        if inner.staged_device.is_some()
            || (inner.bound_device.is_some() && !inner.device_release_pending)
        {
            return Err(CameraError::invalid_config("only one input is supported"));
        }
        info!(pid = self.identity.pid, camera_id = %device.camera_id(), "Input staged");
        inner.staged_device = Some(device.clone());
        Ok(())
    }

    pub fn remove_input(&self, device: &Arc<CameraDevice>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_config(&inner)?;
        if matches!(&inner.staged_device, Some(d) if Arc::ptr_eq(d, device)) {
            inner.staged_device = None;
            return Ok(());
        }
        if matches!(&inner.bound_device, Some(d) if Arc::ptr_eq(d, device)) {
            inner.device_release_pending = true;
            return Ok(());
        }
        Err(CameraError::invalid_arg("device is not an input of this session"))
    }

    pub fn add_output(&self, stream: &Arc<OutputStream>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_config(&inner)?;
        if inner.staged_streams.iter().any(|s| Arc::ptr_eq(s, stream)) {
            return Err(CameraError::invalid_config("stream already added"));
        }
        let committed = self.streams.read().iter().any(|s| Arc::ptr_eq(s, stream));
        if committed {
            if !stream.is_release_pending() {
                return Err(CameraError::invalid_config("stream already committed"));
            }
            // 撤销本轮的移除
            stream.set_release_pending(false);
            if let Some(id) = stream.stream_id() {
                inner.pending_removal.retain(|pending| *pending != id);
            }
            return Ok(());
        }
        if stream.is_linked() {
            return Err(CameraError::invalid_arg("stream is in use by another session"));
        }
        inner.staged_streams.push(stream.clone());
        Ok(())
    }

    pub fn remove_output(&self, stream: &Arc<OutputStream>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_config(&inner)?;
        if let Some(pos) = inner.staged_streams.iter().position(|s| Arc::ptr_eq(s, stream)) {
            inner.staged_streams.remove(pos);
            return Ok(());
        }
        let committed = self.streams.read().iter().any(|s| Arc::ptr_eq(s, stream));
        if !committed {
            return Err(CameraError::invalid_arg("stream is not an output of this session"));
        }
        if !stream.is_release_pending() {
            stream.set_release_pending(true);
            if let Some(id) = stream.stream_id() {
                inner.pending_removal.push(id);
            }
        }
        Ok(())
    }

    fn validate(inner: &SessionInner, committed: usize) -> Result<()> {
        let has_device = inner.staged_device.is_some()
            || (inner.bound_device.is_some() && !inner.device_release_pending);
        if !has_device {
            return Err(CameraError::invalid_config("no input device"));
        }
        let net = inner.staged_streams.len() + committed;
        if net <= inner.pending_removal.len() {
            return Err(CameraError::invalid_config("no output stream"));
        }
        Ok(())
    }

    // --- 提交 ---

    pub fn commit_config(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_config(&inner)?;
        let committed = self.streams.read().clone();
        Self::validate(&inner, committed.len())?;

        let old_device = inner.bound_device.clone();
        let device_changed = inner.staged_device.is_some();
        let Some(device) = inner.staged_device.clone().or_else(|| old_device.clone()) else {
            return Err(CameraError::invalid_config("no input device"));
        };
        let staged = inner.staged_streams.clone();
        let device_was_open = device.is_open();
        let scene = CommitScene {
            snapshots: committed
                .iter()
                .chain(staged.iter())
                .map(|s| (s.clone(), s.link_snapshot()))
                .collect(),
            relink: device_changed || !device_was_open,
            old_device_was_open: old_device.as_ref().is_some_and(|d| d.is_open()),
            device_was_open,
            device,
            old_device,
            device_changed,
            committed,
            staged,
            first_new_id: inner.next_stream_id,
        };

        let mut preempted = Vec::new();
        let outcome = match self.apply(&scene, &mut preempted) {
            Ok(()) => {
                self.finish_commit(&mut inner, scene);
                Ok(())
            }
            Err(e) => {
                self.rollback(&mut inner, scene, &e, &mut preempted);
                Err(e)
            }
        };
        drop(inner);

        for session in preempted.into_iter().filter(|s| s.id != self.id) {
            session.evict(ReleaseReason::Preempted);
        }
        outcome
    }

    fn apply(&self, scene: &CommitScene, preempted: &mut Vec<Arc<CaptureSession>>) -> Result<()> {
        if scene.relink {
            for s in &scene.committed {
                s.unlink();
            }
        }
        let me = self
            .self_ref
            .upgrade()
            .ok_or_else(|| CameraError::invalid_state("session is being dropped"))?;
        scene
            .device
            .open_with_owner(&self.identity, Some(&me), preempted)?;
        let operator = scene.device.stream_operator(self.stream_router())?;
        let settings = scene.device.settings();

        let mut to_create: Vec<Arc<OutputStream>> = Vec::new();
        if scene.relink {
            for s in scene.committed.iter().filter(|s| !s.is_release_pending()) {
                let Some(id) = s.stream_id() else {
                    continue;
                };
                s.link_input(operator.clone(), settings.clone(), id)?;
                to_create.push(s.clone());
            }
        }
        for (offset, s) in (0i32..).zip(scene.staged.iter()) {
            s.link_input(operator.clone(), settings.clone(), scene.first_new_id + offset)?;
            to_create.push(s.clone());
        }
        if to_create.is_empty() {
            return Ok(());
        }

        let infos: Vec<StreamInfo> = to_create.iter().map(|s| s.describe()).collect();
        let ids: Vec<i32> = infos.iter().map(|i| i.stream_id).collect();
        operator.create_streams(&infos).map_err(|status| {
            warn!(pid = self.identity.pid, ?ids, %status, "Create streams failed");
            CameraError::from(status)
        })?;
        if let Err(status) = operator.commit_streams(OperationMode::Normal, &settings) {
            warn!(pid = self.identity.pid, ?ids, %status, "Commit streams failed");
            if let Err(release) = operator.release_streams(&ids) {
                warn!(?ids, %release, "Releasing just-created streams failed");
            }
            return Err(status.into());
        }
        Ok(())
    }

    fn finish_commit(&self, inner: &mut MutexGuard<'_, SessionInner>, scene: CommitScene) {
        let removed: Vec<Arc<OutputStream>> = scene
            .committed
            .iter()
            .filter(|s| s.is_release_pending())
            .cloned()
            .collect();
        if !removed.is_empty() {
            // 换设备时这些流从未在新设备上创建
            if !scene.relink {
                let ids: Vec<i32> = removed.iter().filter_map(|s| s.stream_id()).collect();
                if let Some(op) = scene.device.current_operator() {
                    if let Err(status) = op.release_streams(&ids) {
                        warn!(?ids, %status, "Releasing removed streams failed");
                    }
                }
            }
            for s in &removed {
                s.release();
            }
        }
        if scene.relink {
            for s in &scene.committed {
                if let Some(repeat) = s.as_repeat() {
                    repeat.reset();
                }
            }
        }
        if let Some(old) = scene.old_device.as_ref().filter(|_| scene.device_changed) {
            if !Arc::ptr_eq(old, &scene.device) {
                old.close();
                old.set_owner(None);
            }
        }

        let mut committed: Vec<Arc<OutputStream>> = scene
            .committed
            .into_iter()
            .filter(|s| !removed.iter().any(|r| Arc::ptr_eq(r, s)))
            .collect();
        committed.extend(scene.staged.iter().cloned());
        let count = committed.len();
        *self.streams.write() = committed;

        scene.device.set_owner(Some(self.self_ref.clone()));
        inner.bound_device = Some(scene.device.clone());
        inner.device_release_pending = false;
        inner.staged_device = None;
        inner.staged_streams.clear();
        inner.pending_removal.clear();
        inner.next_stream_id = scene.first_new_id + scene.staged.len() as i32;
        inner.state = SessionState::Committed;
        info!(
            pid = self.identity.pid,
            camera_id = %scene.device.camera_id(),
            streams = count,
            removed = removed.len(),
            "Config committed"
        );
    }

    fn rollback(
        &self,
        inner: &mut MutexGuard<'_, SessionInner>,
        scene: CommitScene,
        cause: &CameraError,
        preempted: &mut Vec<Arc<CaptureSession>>,
    ) {
        warn!(pid = self.identity.pid, error = %cause, "Commit failed, rolling back");
        for (s, snapshot) in scene.snapshots {
            s.restore_link(snapshot);
        }
        for s in &scene.committed {
            s.set_release_pending(false);
        }
        if !scene.device_was_open {
            scene.device.close();
        }
        if scene.device_changed {
            scene.device.set_owner(None);
        }
        // 冲突处理可能已经关掉了旧设备
        if let Some(old) = scene.old_device.as_ref().filter(|_| scene.device_changed) {
            if scene.old_device_was_open && !old.is_open() {
                self.reopen_previous(old, &scene.committed, preempted);
            }
        }

        inner.device_release_pending = false;
        inner.staged_device = None;
        inner.staged_streams.clear();
        inner.pending_removal.clear();
        inner.state = inner.prev_state;
    }

    /// 回滚时恢复旧设备与其上的流
    fn reopen_previous(
        &self,
        device: &Arc<CameraDevice>,
        committed: &[Arc<OutputStream>],
        preempted: &mut Vec<Arc<CaptureSession>>,
    ) {
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        if let Err(e) = device.open_with_owner(&self.identity, Some(&me), preempted) {
            error!(camera_id = %device.camera_id(), error = %e, "Reopening previous device failed");
            return;
        }
        let operator = match device.stream_operator(self.stream_router()) {
            Ok(op) => op,
            Err(e) => {
                error!(camera_id = %device.camera_id(), error = %e, "No stream operator on reopen");
                return;
            }
        };
        let settings = device.settings();
        let mut started = Vec::new();
        for s in committed {
            if let Some(repeat) = s.as_repeat() {
                if repeat.is_started() {
                    started.push(s.clone());
                }
                repeat.reset();
            }
            s.unlink();
            if let Some(id) = s.stream_id() {
                if let Err(e) = s.link_input(operator.clone(), settings.clone(), id) {
                    warn!(stream_id = id, error = %e, "Relink on reopen failed");
                }
            }
        }
        let infos: Vec<StreamInfo> = committed
            .iter()
            .filter(|s| s.is_linked())
            .map(|s| s.describe())
            .collect();
        if infos.is_empty() {
            return;
        }
        let restored = operator
            .create_streams(&infos)
            .and_then(|_| operator.commit_streams(OperationMode::Normal, &settings));
        if let Err(status) = restored {
            error!(camera_id = %device.camera_id(), %status, "Restoring previous streams failed");
            return;
        }
        for s in started {
            if let Some(Err(e)) = s.as_repeat().map(|r| r.start()) {
                warn!(error = %e, "Restarting repeat stream failed");
            }
        }
        info!(camera_id = %device.camera_id(), "Previous device restored");
    }

    fn stream_router(&self) -> Arc<dyn StreamOperatorCallback> {
        Arc::new(StreamEventRouter::new(self.self_ref.clone()))
    }

    pub(crate) fn find_committed_stream(&self, stream_id: i32) -> Option<Arc<OutputStream>> {
        self.streams
            .read()
            .iter()
            .find(|s| s.stream_id() == Some(stream_id))
            .cloned()
    }

    // --- 运行阶段 ---

    /// 启动所有非录像的预览流
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_live(&inner)?;
        if inner.state != SessionState::Committed {
            return Err(CameraError::invalid_state("session is not committed"));
        }
        if !self
            .permissions
            .is_usage_allowed(self.identity.token_id, &self.camera_permission)
        {
            warn!(pid = self.identity.pid, "Start rejected, camera usage not allowed");
            return Err(CameraError::permission_denied(&self.camera_permission));
        }
        if inner.permission_watch.is_none() {
            inner.permission_watch = Some(self.watch_permissions());
        }

        let streams = self.streams.read().clone();
        for s in &streams {
            if let Some(repeat) = s.as_repeat().filter(|r| !r.is_video()) {
                repeat.start()?;
            }
        }
        info!(pid = self.identity.pid, "Session started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let inner = self.inner.lock();
        Self::check_live(&inner)?;
        if inner.state != SessionState::Committed {
            return Err(CameraError::invalid_state("session is not committed"));
        }
        let streams = self.streams.read().clone();
        let mut first_err = None;
        for s in &streams {
            if let Some(repeat) = s.as_repeat().filter(|r| !r.is_video()) {
                if let Err(e) = repeat.stop() {
                    first_err.get_or_insert(e);
                }
            }
        }
        info!(pid = self.identity.pid, "Session stopped");
        first_err.map_or(Ok(()), Err)
    }

    fn watch_permissions(&self) -> PermissionWatch {
        let watcher = Arc::new(PermissionWatcher::new(self.self_ref.clone()));
        let usage: Arc<dyn UsageStateObserver> = watcher.clone();
        let state: Arc<dyn PermissionStateObserver> = watcher;
        let token = self.identity.token_id;
        if !self
            .permissions
            .start_using(token, &self.camera_permission, usage)
        {
            warn!(pid = self.identity.pid, "Start using permission failed");
        }
        if !self
            .permissions
            .register_state_change(token, &self.camera_permission, state.clone())
        {
            warn!(pid = self.identity.pid, "Permission state registration failed");
        }
        PermissionWatch {
            state_observer: state,
        }
    }

    pub(crate) fn is_usage_allowed(&self) -> bool {
        self.permissions
            .is_usage_allowed(self.identity.token_id, &self.camera_permission)
    }

    pub(crate) fn background_release_delay(&self) -> Duration {
        self.background_release_delay
    }

    // --- 释放 ---

    /// 释放全部资源，可重复调用
    pub fn release(&self) -> Result<()> {
        self.release_inner(None);
        Ok(())
    }

    /// 服务端强制释放，会通知会话回调
    pub(crate) fn release_forced(&self, reason: ReleaseReason) {
        self.release_inner(Some(reason));
    }

    /// 同进程的新会话取代本会话：设备先收到抢占错误，再释放
    pub(crate) fn preempt(&self) {
        let device = self.inner.lock().bound_device.clone();
        if let Some(d) = device {
            d.notify_error(DeviceError::DevicePreempted, 0);
        }
        self.release_forced(ReleaseReason::Preempted);
    }

    /// 不阻塞调用方的强制释放：会话锁正被占用时交给后台线程
    pub(crate) fn evict(self: &Arc<Self>, reason: ReleaseReason) {
        match self.inner.try_lock() {
            Some(inner) => self.release_locked(inner, Some(reason)),
            None => {
                debug!(
                    pid = self.identity.pid,
                    session = self.id,
                    ?reason,
                    "Session busy, releasing in background"
                );
                let session = self.clone();
                runtime::spawn_blocking(move || session.release_forced(reason));
            }
        }
    }

    fn release_inner(&self, reason: Option<ReleaseReason>) {
        self.release_locked(self.inner.lock(), reason);
    }

    fn release_locked(
        &self,
        mut inner: MutexGuard<'_, SessionInner>,
        reason: Option<ReleaseReason>,
    ) {
        if inner.released {
            return;
        }
        inner.released = true;

        let streams = std::mem::take(&mut *self.streams.write());
        let staged = std::mem::take(&mut inner.staged_streams);
        let device = inner.bound_device.take();
        let ids: Vec<i32> = streams
            .iter()
            .filter(|s| s.is_linked())
            .filter_map(|s| s.stream_id())
            .collect();
        let operator = device.as_ref().and_then(|d| d.current_operator());
        for s in streams.iter().chain(staged.iter()) {
            s.release();
        }
        if let (Some(op), false) = (&operator, ids.is_empty()) {
            if let Err(status) = op.release_streams(&ids) {
                warn!(?ids, %status, "Release streams failed");
            }
        }
        if let Some(dev) = device {
            dev.close();
            dev.set_owner(None);
        }
        inner.staged_device = None;
        inner.pending_removal.clear();
        inner.device_release_pending = false;
        inner.state = SessionState::Init;
        let callback = inner.callback.take();
        let watch = inner.permission_watch.take();
        drop(inner);

        if let Some(watch) = watch {
            let token = self.identity.token_id;
            self.permissions.stop_using(token, &self.camera_permission);
            self.permissions
                .unregister_state_change(&watch.state_observer);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
        info!(pid = self.identity.pid, ?reason, "Session released");
        if let (Some(reason), Some(cb)) = (reason, callback) {
            cb.on_force_released(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use camsvc_core::buffer::BufferProducer;
    use camsvc_core::pixel_format::PixelFormat;
    use camsvc_simulation::{
        sample_ability, SimBufferProducer, SimHost, SimHostConnector, SimPermissionBroker,
    };

    use crate::service::CameraService;

    const HOST: &str = "camera_service";

    fn service() -> Arc<CameraService> {
        let host = SimHost::new(HOST)
            .with_camera("0", sample_ability(1, 90))
            .with_camera("1", sample_ability(2, 270));
        let connector = Arc::new(SimHostConnector::new().with_host(host));
        let config = ServiceConfig::new()
            .hosts([HOST])
            .background_release_delay_ms(0);
        let service = CameraService::new(config, connector, Arc::new(SimPermissionBroker::new()));
        service.start();
        service
    }

    /// 暂存好一个相机 + 一路预览，尚未提交
    fn staged(
        service: &CameraService,
        pid: i32,
        camera_id: &str,
    ) -> (Arc<CaptureSession>, Arc<CameraDevice>) {
        let who = ClientIdentity::new(pid, 10_000 + pid as u32, 700 + pid as u32);
        let producer: Arc<dyn BufferProducer> = SimBufferProducer::new(640, 480);
        let out = service
            .create_preview_output(Some(producer), PixelFormat::YCbCr420Sp, 640, 480)
            .unwrap();
        let device = service.create_camera_device(&who, camera_id).unwrap();
        let session = service.create_capture_session(&who);
        session.begin_config().unwrap();
        session.add_input(&device).unwrap();
        session.add_output(&out).unwrap();
        (session, device)
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    #[test]
    fn commit_does_not_wait_on_preempted_session_lock() {
        let service = service();
        let (holder, holder_device) = staged(&service, 1, "0");
        holder.commit_config().unwrap();
        let (contender, contender_device) = staged(&service, 2, "1");

        // holder 正忙于另一个操作，锁一直不放
        let busy = holder.inner.lock();
        let (tx, rx) = mpsc::channel();
        let committing = contender.clone();
        thread::spawn(move || {
            let _ = tx.send(committing.commit_config());
        });
        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("commit blocked on another session's lock");
        assert!(result.is_ok());
        assert!(contender_device.is_open());
        assert!(!holder_device.is_open());
        assert!(!busy.released);
        drop(busy);

        // 锁放开后，后台补上释放；登记表最后才移除
        assert!(wait_until(|| service.session_registry().get(1).is_none()));
        assert!(holder.is_released());
        assert!(holder.committed_streams().is_empty());
        assert_eq!(contender.state(), SessionState::Committed);
    }

    #[test]
    fn idle_preempted_session_is_released_before_commit_returns() {
        let service = service();
        let (holder, _) = staged(&service, 1, "0");
        holder.commit_config().unwrap();
        let (contender, _) = staged(&service, 2, "0");

        contender.commit_config().unwrap();
        assert!(holder.is_released());
        assert_eq!(contender.state(), SessionState::Committed);
    }
}
