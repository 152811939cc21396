use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use camsvc_core::identity::Pid;

use super::CaptureSession;
use crate::callbacks::ReleaseReason;

/// 进程级会话表：每个客户端进程最多一个活动会话
///
/// 表锁只包住表本身的增删；被取代会话的释放在锁外进行。
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Pid, Arc<CaptureSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 登记新会话；同一进程已有的会话先被抢占释放
    pub fn install(&self, session: Arc<CaptureSession>) {
        let pid = session.identity().pid;
        let previous = self.sessions.lock().remove(&pid);
        if let Some(old) = previous.filter(|old| !Arc::ptr_eq(old, &session)) {
            warn!(pid, old = old.id(), new = session.id(), "Superseding existing session");
            old.preempt();
        }
        self.sessions.lock().insert(pid, session);
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<CaptureSession>> {
        self.sessions.lock().get(&pid).cloned()
    }

    /// 只移除同一个会话，避免误删已取代它的新会话
    pub(crate) fn remove(&self, session: &CaptureSession) {
        let pid = session.identity().pid;
        let mut sessions = self.sessions.lock();
        if sessions.get(&pid).is_some_and(|s| s.id() == session.id()) {
            sessions.remove(&pid);
        }
    }

    pub fn sessions(&self) -> Vec<Arc<CaptureSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// 释放所有会话 (服务停止)
    pub fn release_all(&self, reason: ReleaseReason) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            info!(count = sessions.len(), ?reason, "Releasing all sessions");
        }
        for s in sessions {
            s.release_forced(reason);
        }
    }
}
