//! 命令层统一错误定义
//!
//! 预执行取消（executing 事件中 `cancel`）不属于错误，表现为 `Execution::Cancelled`。
//!
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// 执行体返回的错误（同步执行体直接返回给调用方；异步执行体经 `wait` 返回）
    #[error("execution failed: {0}")]
    Execution(#[source] anyhow::Error),

    #[error("command already running")]
    AlreadyRunning,

    #[error("no tokio runtime available for async command")]
    NoRuntime,

    #[error("async execution aborted: {0}")]
    Aborted(String),

    #[error("command not found: {0}")]
    NotFound(String),

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("activity stream: {0}")]
    Activity(String),
}

pub type CommandResult<T> = Result<T, CommandError>;
