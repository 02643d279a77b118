//! 命令生命周期事件参数
//!
//! - `ExecutingArgs`：执行前事件，可取消；
//! - `ExecutedArgs`：成功执行后事件，不可取消；
//! - `CancelledArgs`：执行前事件被取消后的通知；
//! - `FailedExecution`：执行体失败（同步或异步）的观察记录。
//!
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 单次 `execute` 调用的标识，贯穿该次调用的全部事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 执行前事件；任一订阅者调用 `cancel` 即中止本次执行
#[derive(Debug)]
pub struct ExecutingArgs<'a, P> {
    execution_id: ExecutionId,
    parameter: &'a P,
    cancel: bool,
}

impl<'a, P> ExecutingArgs<'a, P> {
    pub(crate) fn new(execution_id: ExecutionId, parameter: &'a P) -> Self {
        Self {
            execution_id,
            parameter,
            cancel: false,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn parameter(&self) -> &'a P {
        self.parameter
    }

    pub fn cancel(&mut self) {
        self.cancel = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }
}

/// 执行成功事件
#[derive(Debug)]
pub struct ExecutedArgs<'a, P> {
    pub execution_id: ExecutionId,
    pub parameter: &'a P,
}

/// 执行前事件被取消
#[derive(Debug)]
pub struct CancelledArgs<'a, P> {
    pub execution_id: ExecutionId,
    pub parameter: &'a P,
}

/// 执行失败记录
///
/// `handled` 表示该失败是否已有归宿：同步失败会返回给调用方，异步失败则看是否配置了
/// 异常处理器。未处理的异步失败由注册表转发到 `on_unhandled_failure`。
#[derive(Debug)]
pub struct FailedExecution<'a, P> {
    pub execution_id: ExecutionId,
    pub parameter: &'a P,
    pub error: &'a anyhow::Error,
    pub handled: bool,
}
