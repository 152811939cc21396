#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 相机服务配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct ServiceConfig {
    /// 服务启动时连接的 Host 名称
    pub hosts: Vec<String>,
    /// 使用相机所需的权限名
    pub camera_permission: String,
    /// 管理相机配置 (静音等) 所需的权限名
    pub manage_config_permission: String,
    /// 设备待下发 settings 缓冲区的条目上限
    pub settings_item_capacity: usize,
    /// 设备待下发 settings 缓冲区的数据字节上限
    pub settings_data_capacity: usize,
    /// 会话分配的第一个驱动流 ID
    pub first_stream_id: i32,
    /// 应用切到后台后延迟多久释放会话 (毫秒)，0 表示立即释放
    pub background_release_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self {
            hosts: vec!["camera_service".to_string()],
            camera_permission: "camsvc.permission.CAMERA".to_string(),
            manage_config_permission: "camsvc.permission.MANAGE_CAMERA_CONFIG".to_string(),
            settings_item_capacity: 100,
            settings_data_capacity: 2000,
            first_stream_id: 1,
            background_release_delay_ms: 200,
        }
    }

    /// 替换启动时连接的 Host 列表
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn camera_permission(mut self, name: impl Into<String>) -> Self {
        self.camera_permission = name.into();
        self
    }

    pub fn manage_config_permission(mut self, name: impl Into<String>) -> Self {
        self.manage_config_permission = name.into();
        self
    }

    /// 设置 settings 缓冲区容量 (条目数, 字节数)
    pub fn settings_capacity(mut self, items: usize, bytes: usize) -> Self {
        self.settings_item_capacity = items;
        self.settings_data_capacity = bytes;
        self
    }

    pub fn first_stream_id(mut self, id: i32) -> Self {
        self.first_stream_id = id;
        self
    }

    pub fn background_release_delay_ms(mut self, ms: u64) -> Self {
        self.background_release_delay_ms = ms;
        self
    }

    /// 从 JSON 加载，缺失字段取默认值
    #[cfg(feature = "serialize")]
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    #[cfg(feature = "serialize")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
