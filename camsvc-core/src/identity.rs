#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 访问令牌 ID (权限子系统里识别调用方的句柄)
pub type TokenId = u32;

/// 客户端进程号
pub type Pid = libc::pid_t;

/// 调用方身份
///
/// 由传输层在每次请求时提供。会话与设备句柄都记住创建者身份，
/// 之后的操作用它做比对。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ClientIdentity {
    pub pid: Pid,
    pub uid: libc::uid_t,
    pub token_id: TokenId,
}

impl ClientIdentity {
    pub fn new(pid: Pid, uid: libc::uid_t, token_id: TokenId) -> Self {
        Self { pid, uid, token_id }
    }
}
