use bon::Builder;
use serde::{Deserialize, Serialize};

/// 同一命令实例上一次调用尚未结束（异步执行体仍在运行）时，对新调用的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentrancyPolicy {
    /// 拒绝：返回 `CommandError::AlreadyRunning`，不触发任何事件
    #[default]
    Reject,
    /// 允许交错执行
    Allow,
}

/// 注册表配置
#[derive(Builder, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 注册表内创建的命令所采用的重入策略
    #[builder(default)]
    pub reentrancy: ReentrancyPolicy,
    /// 活动流（`CommandRegistry::subscribe`）的广播缓冲容量
    #[builder(default = 256)]
    pub activity_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reentrancy: ReentrancyPolicy::default(),
            activity_capacity: 256,
        }
    }
}
