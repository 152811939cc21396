use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use camsvc_core::identity::TokenId;
use camsvc_core::traits::{PermissionBroker, PermissionStateObserver, UsageStateObserver};

#[derive(Default)]
struct BrokerState {
    /// 被撤销的 (token, permission)
    revoked: HashSet<(TokenId, String)>,
    background: HashSet<TokenId>,
    using: Vec<(TokenId, String, Arc<dyn UsageStateObserver>)>,
    watchers: Vec<(TokenId, String, Arc<dyn PermissionStateObserver>)>,
}

/// 内存权限子系统
///
/// 默认所有 token 都已授权且在前台。`revoke` / `set_foreground` 会同步回调已登记的观察者。
#[derive(Default)]
pub struct SimPermissionBroker {
    state: Mutex<BrokerState>,
}

impl SimPermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, token: TokenId, permission: &str) {
        let watchers = {
            let mut state = self.state.lock();
            state.revoked.remove(&(token, permission.to_string()));
            Self::matching(&state.watchers, token, permission)
        };
        for w in watchers {
            w.on_permission_state_changed(token, permission, true);
        }
    }

    pub fn revoke(&self, token: TokenId, permission: &str) {
        let watchers = {
            let mut state = self.state.lock();
            state.revoked.insert((token, permission.to_string()));
            Self::matching(&state.watchers, token, permission)
        };
        for w in watchers {
            w.on_permission_state_changed(token, permission, false);
        }
    }

    /// 切换前后台，通知正在使用权限的观察者
    pub fn set_foreground(&self, token: TokenId, foreground: bool) {
        let observers: Vec<_> = {
            let mut state = self.state.lock();
            if foreground {
                state.background.remove(&token);
            } else {
                state.background.insert(token);
            }
            state
                .using
                .iter()
                .filter(|(t, _, _)| *t == token)
                .map(|(_, _, o)| o.clone())
                .collect()
        };
        for o in observers {
            o.on_usage_state_changed(token, foreground);
        }
    }

    /// 当前处于 "使用中" 的登记数
    pub fn active_usages(&self) -> usize {
        self.state.lock().using.len()
    }

    pub fn registered_watchers(&self) -> usize {
        self.state.lock().watchers.len()
    }

    fn matching(
        watchers: &[(TokenId, String, Arc<dyn PermissionStateObserver>)],
        token: TokenId,
        permission: &str,
    ) -> Vec<Arc<dyn PermissionStateObserver>> {
        watchers
            .iter()
            .filter(|(t, p, _)| *t == token && p == permission)
            .map(|(_, _, w)| w.clone())
            .collect()
    }
}

impl PermissionBroker for SimPermissionBroker {
    fn verify_access(&self, token: TokenId, permission: &str) -> bool {
        !self
            .state
            .lock()
            .revoked
            .contains(&(token, permission.to_string()))
    }

    fn is_usage_allowed(&self, token: TokenId, permission: &str) -> bool {
        self.verify_access(token, permission) && !self.state.lock().background.contains(&token)
    }

    fn start_using(
        &self,
        token: TokenId,
        permission: &str,
        observer: Arc<dyn UsageStateObserver>,
    ) -> bool {
        debug!(token, permission, "start using");
        self.state
            .lock()
            .using
            .push((token, permission.to_string(), observer));
        true
    }

    fn stop_using(&self, token: TokenId, permission: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.using.len();
        state
            .using
            .retain(|(t, p, _)| !(*t == token && p == permission));
        before != state.using.len()
    }

    fn register_state_change(
        &self,
        token: TokenId,
        permission: &str,
        observer: Arc<dyn PermissionStateObserver>,
    ) -> bool {
        self.state
            .lock()
            .watchers
            .push((token, permission.to_string(), observer));
        true
    }

    fn unregister_state_change(&self, observer: &Arc<dyn PermissionStateObserver>) -> bool {
        let mut state = self.state.lock();
        let before = state.watchers.len();
        state.watchers.retain(|(_, _, w)| !Arc::ptr_eq(w, observer));
        before != state.watchers.len()
    }
}
