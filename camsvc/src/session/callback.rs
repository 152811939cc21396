use std::sync::Weak;

use tracing::{debug, warn};

use camsvc_core::descriptor::{CaptureEndedInfo, CaptureErrorInfo};
use camsvc_core::identity::TokenId;
use camsvc_core::traits::{PermissionStateObserver, StreamOperatorCallback, UsageStateObserver};

use super::{CaptureSession, SessionState};
use crate::callbacks::ReleaseReason;
use crate::internal::runtime;
use crate::stream::OutputStream;

/// 驱动 Stream Operator 回调 → 按流 ID 分发到会话里的流
///
/// 只读会话的已提交流列表，不拿会话主锁。
pub(crate) struct StreamEventRouter {
    session: Weak<CaptureSession>,
}

impl StreamEventRouter {
    pub(crate) fn new(session: Weak<CaptureSession>) -> Self {
        Self { session }
    }

    fn dispatch(&self, stream_id: i32, f: impl FnOnce(&OutputStream)) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        match session.find_committed_stream(stream_id) {
            Some(stream) => f(&stream),
            None => debug!(stream_id, "Event for unknown stream dropped"),
        }
    }
}

impl StreamOperatorCallback for StreamEventRouter {
    fn on_capture_started(&self, capture_id: i32, stream_ids: &[i32]) {
        for &id in stream_ids {
            self.dispatch(id, |s| {
                if let Some(repeat) = s.as_repeat() {
                    repeat.on_started();
                } else if let Some(capture) = s.as_capture() {
                    capture.on_started(capture_id);
                }
            });
        }
    }

    fn on_capture_ended(&self, capture_id: i32, infos: &[CaptureEndedInfo]) {
        for info in infos {
            self.dispatch(info.stream_id, |s| {
                if let Some(repeat) = s.as_repeat() {
                    repeat.on_ended(info.frame_count);
                } else if let Some(capture) = s.as_capture() {
                    capture.on_ended(capture_id, info.frame_count);
                }
            });
        }
    }

    fn on_capture_error(&self, capture_id: i32, infos: &[CaptureErrorInfo]) {
        for info in infos {
            self.dispatch(info.stream_id, |s| {
                if let Some(repeat) = s.as_repeat() {
                    repeat.on_error(info.error);
                } else if let Some(capture) = s.as_capture() {
                    capture.on_error(capture_id, info.error);
                }
            });
        }
    }

    fn on_frame_shutter(&self, capture_id: i32, stream_ids: &[i32], timestamp: u64) {
        for &id in stream_ids {
            self.dispatch(id, |s| {
                if let Some(capture) = s.as_capture() {
                    capture.on_shutter(capture_id, timestamp);
                }
            });
        }
    }
}

/// 权限撤销 / 切后台时释放已提交的会话
pub(crate) struct PermissionWatcher {
    session: Weak<CaptureSession>,
}

impl PermissionWatcher {
    pub(crate) fn new(session: Weak<CaptureSession>) -> Self {
        Self { session }
    }
}

impl PermissionStateObserver for PermissionWatcher {
    fn on_permission_state_changed(&self, _token: TokenId, permission: &str, granted: bool) {
        if granted {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };
        warn!(pid = session.identity().pid, permission, "Camera permission revoked");
        if session.state() == SessionState::Committed {
            session.release_forced(ReleaseReason::PermissionRevoked);
        }
    }
}

impl UsageStateObserver for PermissionWatcher {
    fn on_usage_state_changed(&self, _token: TokenId, is_foreground: bool) {
        if is_foreground {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let delay = session.background_release_delay();
        let weak = self.session.clone();
        runtime::run_after(delay, move || {
            let Some(session) = weak.upgrade() else {
                return;
            };
            // 延迟期间回到前台则保留会话
            if session.state() != SessionState::Committed || session.is_usage_allowed() {
                return;
            }
            warn!(pid = session.identity().pid, "Client moved to background, releasing session");
            session.release_forced(ReleaseReason::Background);
        });
    }
}
