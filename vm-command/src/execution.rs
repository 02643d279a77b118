use crate::error::{CommandError, CommandResult};
use crate::event_args::ExecutionId;
use tokio::task::JoinHandle;

/// 一次 `execute` 调用的结果
///
/// 异步执行体返回 `Pending`；调用方可以直接丢弃（不会中止任务），也可以 `wait`。
#[derive(Debug)]
pub enum Execution {
    /// 被执行前事件取消，执行体未运行
    Cancelled,
    /// 同步执行体已成功完成
    Completed,
    /// 异步执行体已在运行时上调度
    Pending(PendingExecution),
}

impl Execution {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub async fn wait(self) -> CommandResult<()> {
        match self {
            Self::Pending(pending) => pending.wait().await,
            Self::Cancelled | Self::Completed => Ok(()),
        }
    }
}

/// 进行中的异步执行
#[derive(Debug)]
pub struct PendingExecution {
    execution_id: ExecutionId,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl PendingExecution {
    pub(crate) fn new(execution_id: ExecutionId, handle: JoinHandle<anyhow::Result<()>>) -> Self {
        Self {
            execution_id,
            handle,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待异步执行体结束
    ///
    /// 失败在返回前已交给异常处理器或失败订阅者，这里再把同一错误交给调用方。
    pub async fn wait(self) -> CommandResult<()> {
        match self.handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CommandError::Execution(err)),
            Err(join) => Err(CommandError::Aborted(join.to_string())),
        }
    }
}
