//! 注册表级聚合事件
//!
//! 注册表为每条命令转发生命周期事件并附带命令名；参数以类型擦除方式携带，
//! 订阅者通过 `parameter::<T>()` 还原。
//!
use crate::event_args::ExecutionId;
use std::any::Any;

type AnyParameter<'a> = &'a (dyn Any + Send + Sync);

/// 任一已注册命令即将执行；`cancel` 会传回原命令并中止其执行
#[derive(Debug)]
pub struct CommandExecuting<'a> {
    name: &'a str,
    execution_id: ExecutionId,
    parameter: AnyParameter<'a>,
    cancel: bool,
}

impl<'a> CommandExecuting<'a> {
    pub(crate) fn new(
        name: &'a str,
        execution_id: ExecutionId,
        parameter: AnyParameter<'a>,
        cancel: bool,
    ) -> Self {
        Self {
            name,
            execution_id,
            parameter,
            cancel,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn parameter<T: 'static>(&self) -> Option<&'a T> {
        self.parameter.downcast_ref::<T>()
    }

    pub fn cancel(&mut self) {
        self.cancel = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }
}

/// 任一已注册命令执行成功
#[derive(Debug)]
pub struct CommandExecuted<'a> {
    pub name: &'a str,
    pub execution_id: ExecutionId,
    pub(crate) parameter: AnyParameter<'a>,
}

impl<'a> CommandExecuted<'a> {
    pub fn parameter<T: 'static>(&self) -> Option<&'a T> {
        self.parameter.downcast_ref::<T>()
    }
}

/// 未配置异常处理器的异步命令失败
#[derive(Debug)]
pub struct UnhandledFailure<'a> {
    pub name: &'a str,
    pub execution_id: ExecutionId,
    pub error: &'a anyhow::Error,
    pub(crate) parameter: AnyParameter<'a>,
}

impl<'a> UnhandledFailure<'a> {
    pub fn parameter<T: 'static>(&self) -> Option<&'a T> {
        self.parameter.downcast_ref::<T>()
    }
}
