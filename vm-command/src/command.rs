//! 命令（Command）
//!
//! 单个可执行单元：
//! - `can_execute`：按启用谓词判断是否可执行，未配置谓词时恒为可执行；
//! - `execute`：执行前事件（可取消）→ 执行体 → 执行后事件；
//! - 同步执行体的失败直接返回给调用方；异步执行体在当前 tokio 运行时上调度，
//!   失败交给异常处理器，未配置处理器时交给失败订阅者，都没有时记录错误日志。
//!
//! 命令本身没有名字，名字由 [`CommandRegistry`](crate::registry::CommandRegistry) 在注册时赋予。
//!
use crate::command_spec::{Body, CommandSpec, ErrorHandler, Predicate};
use crate::config::ReentrancyPolicy;
use crate::error::{CommandError, CommandResult};
use crate::event_args::{
    CancelledArgs, ExecutedArgs, ExecutingArgs, ExecutionId, FailedExecution,
};
use crate::execution::{Execution, PendingExecution};
use crate::subscription::{HandlerList, SubscriptionId};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;

pub type ExecutingHandler<P> = dyn Fn(&mut ExecutingArgs<'_, P>) + Send + Sync;

pub type ExecutedHandler<P> = dyn Fn(&ExecutedArgs<'_, P>) + Send + Sync;

pub type CancelledHandler<P> = dyn Fn(&CancelledArgs<'_, P>) + Send + Sync;

pub type FailedHandler<P> = dyn Fn(&FailedExecution<'_, P>) + Send + Sync;

pub type CanExecuteChangedHandler = dyn Fn() + Send + Sync;

pub struct Command<P> {
    body: Body<P>,
    predicate: Option<Predicate<P>>,
    policy: ReentrancyPolicy,
    in_flight: Arc<AtomicUsize>,
    executing: HandlerList<ExecutingHandler<P>>,
    executed: HandlerList<ExecutedHandler<P>>,
    cancelled: HandlerList<CancelledHandler<P>>,
    failed: HandlerList<FailedHandler<P>>,
    can_execute_changed: HandlerList<CanExecuteChangedHandler>,
}

impl<P> Command<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(spec: impl Into<CommandSpec<P>>) -> Self {
        Self::with_policy(spec, ReentrancyPolicy::default())
    }

    pub fn with_policy(spec: impl Into<CommandSpec<P>>, policy: ReentrancyPolicy) -> Self {
        let CommandSpec { body, predicate } = spec.into();
        Self {
            body,
            predicate,
            policy,
            in_flight: Arc::new(AtomicUsize::new(0)),
            executing: HandlerList::default(),
            executed: HandlerList::default(),
            cancelled: HandlerList::default(),
            failed: HandlerList::default(),
            can_execute_changed: HandlerList::default(),
        }
    }

    /// 评估启用谓词；未配置谓词时对任意参数（包括 `None`）返回 true
    pub fn can_execute(&self, parameter: Option<&P>) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(parameter),
            None => true,
        }
    }

    /// 执行命令
    ///
    /// - 被执行前事件取消：返回 `Execution::Cancelled`，执行体不运行，也不触发执行后事件；
    /// - 同步执行体：运行完毕后返回 `Execution::Completed`，失败返回 `CommandError::Execution`；
    /// - 异步执行体：调度后立即返回 `Execution::Pending`，需在 tokio 运行时内调用。
    ///
    /// 并不检查 `can_execute`，是否可执行由调用方（通常是 UI 宿主）负责判断。
    pub fn execute(self: &Arc<Self>, parameter: P) -> CommandResult<Execution> {
        let runtime = match &self.body {
            Body::Async { .. } => {
                Some(Handle::try_current().map_err(|_| CommandError::NoRuntime)?)
            }
            Body::Sync(_) => None,
        };
        let guard = self.enter()?;
        let execution_id = ExecutionId::new();

        if !self.raise_executing(execution_id, &parameter) {
            drop(guard);
            tracing::debug!(%execution_id, "command execution cancelled");
            self.raise_cancelled(execution_id, &parameter);
            return Ok(Execution::Cancelled);
        }

        match &self.body {
            Body::Sync(run) => {
                let outcome = run(parameter.clone());
                drop(guard);
                match outcome {
                    Ok(()) => {
                        self.raise_executed(execution_id, &parameter);
                        Ok(Execution::Completed)
                    }
                    Err(error) => {
                        self.raise_failed(&FailedExecution {
                            execution_id,
                            parameter: &parameter,
                            error: &error,
                            handled: true,
                        });
                        Err(CommandError::Execution(error))
                    }
                }
            }
            Body::Async { run, on_error } => {
                let runtime = runtime.ok_or(CommandError::NoRuntime)?;
                let future = run(parameter.clone());
                let command = Arc::clone(self);
                let on_error = on_error.clone();

                let handle = runtime.spawn(async move {
                    let outcome = AssertUnwindSafe(future).catch_unwind().await;
                    drop(guard);
                    match outcome {
                        Ok(Ok(())) => {
                            command.raise_executed(execution_id, &parameter);
                            Ok(())
                        }
                        Ok(Err(error)) => {
                            command.report_async_failure(
                                execution_id,
                                &parameter,
                                &error,
                                on_error.as_ref(),
                            );
                            Err(error)
                        }
                        Err(payload) => {
                            // 先按失败上报，再恢复 panic，`wait` 得到 `Aborted`
                            let error = anyhow::anyhow!(
                                "async command panicked: {}",
                                panic_message(payload.as_ref())
                            );
                            command.report_async_failure(
                                execution_id,
                                &parameter,
                                &error,
                                on_error.as_ref(),
                            );
                            std::panic::resume_unwind(payload)
                        }
                    }
                });

                Ok(Execution::Pending(PendingExecution::new(execution_id, handle)))
            }
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.body, Body::Async { .. })
    }

    /// 是否有尚未结束的调用
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub fn policy(&self) -> ReentrancyPolicy {
        self.policy
    }

    pub fn on_executing<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&mut ExecutingArgs<'_, P>) + Send + Sync + 'static,
    {
        self.executing.add(Arc::new(handler))
    }

    pub fn on_executed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ExecutedArgs<'_, P>) + Send + Sync + 'static,
    {
        self.executed.add(Arc::new(handler))
    }

    pub fn on_cancelled<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CancelledArgs<'_, P>) + Send + Sync + 'static,
    {
        self.cancelled.add(Arc::new(handler))
    }

    /// 观察执行体失败；不改变失败的传播方式
    pub fn on_failed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&FailedExecution<'_, P>) + Send + Sync + 'static,
    {
        self.failed.add(Arc::new(handler))
    }

    pub fn on_can_execute_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.can_execute_changed.add(Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.executing.remove(id)
            || self.executed.remove(id)
            || self.cancelled.remove(id)
            || self.failed.remove(id)
            || self.can_execute_changed.remove(id)
    }

    /// 各类事件上的订阅总数
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.executing.snapshot().len()
            + self.executed.snapshot().len()
            + self.cancelled.snapshot().len()
            + self.failed.snapshot().len()
            + self.can_execute_changed.snapshot().len()
    }

    /// 通知订阅者重新查询 `can_execute`
    pub fn raise_can_execute_changed(&self) {
        for handler in self.can_execute_changed.snapshot() {
            handler();
        }
    }

    fn enter(&self) -> CommandResult<InFlight> {
        match self.policy {
            ReentrancyPolicy::Reject => {
                if self
                    .in_flight
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    tracing::warn!("command rejected: previous invocation still in flight");
                    return Err(CommandError::AlreadyRunning);
                }
            }
            ReentrancyPolicy::Allow => {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(InFlight(self.in_flight.clone()))
    }

    /// 返回是否继续执行
    fn raise_executing(&self, execution_id: ExecutionId, parameter: &P) -> bool {
        let mut args = ExecutingArgs::new(execution_id, parameter);
        for handler in self.executing.snapshot() {
            handler(&mut args);
        }
        !args.is_cancelled()
    }

    fn raise_executed(&self, execution_id: ExecutionId, parameter: &P) {
        tracing::debug!(%execution_id, "command executed");
        let args = ExecutedArgs {
            execution_id,
            parameter,
        };
        for handler in self.executed.snapshot() {
            handler(&args);
        }
    }

    fn raise_cancelled(&self, execution_id: ExecutionId, parameter: &P) {
        let args = CancelledArgs {
            execution_id,
            parameter,
        };
        for handler in self.cancelled.snapshot() {
            handler(&args);
        }
    }

    fn raise_failed(&self, failed: &FailedExecution<'_, P>) {
        for handler in self.failed.snapshot() {
            handler(failed);
        }
    }

    fn report_async_failure(
        &self,
        execution_id: ExecutionId,
        parameter: &P,
        error: &anyhow::Error,
        on_error: Option<&ErrorHandler<P>>,
    ) {
        let failed = FailedExecution {
            execution_id,
            parameter,
            error,
            handled: on_error.is_some(),
        };

        match on_error {
            Some(handler) => handler(&failed),
            None if self.failed.is_empty() => {
                tracing::error!(%execution_id, error = %error, "unobserved async command failure");
            }
            None => {}
        }

        self.raise_failed(&failed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl<P> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("is_async", &matches!(self.body, Body::Async { .. }))
            .field("has_predicate", &self.predicate.is_some())
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

/// 进行中调用的计数守卫，drop 时归还
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
