//! 视图模型命令库（vm-command）
//!
//! 为 UI 宿主（视图模型层）提供按名称管理的命令：
//! - 命令（`command`）：启用谓词、同步/异步执行体、可取消的执行前事件与执行后事件；
//! - 注册表（`registry`）：名称 → 命令的映射与工厂，并把各命令的生命周期事件
//!   带上名称聚合为注册表级事件，执行前事件的取消会传回原命令；
//! - 活动流（`activity`）：可序列化的命令活动记录，用于忙碌指示与审计。
//!
//! 渲染、数据绑定与调度由外部 UI 框架负责，本 crate 只产出被其调用的命令对象。
//!
pub mod activity;
pub mod command;
pub mod command_handler;
pub mod command_spec;
pub mod config;
pub mod error;
pub mod event_args;
pub mod execution;
pub mod registry;
pub mod registry_event;
pub mod subscription;

pub use activity::{ActivityKind, CommandActivity};
pub use command::Command;
pub use command_handler::AsyncCommandHandler;
pub use command_spec::{AsyncCommandSpec, CommandSpec};
pub use config::{ReentrancyPolicy, RegistryConfig};
pub use error::{CommandError, CommandResult};
pub use event_args::{CancelledArgs, ExecutedArgs, ExecutingArgs, ExecutionId, FailedExecution};
pub use execution::{Execution, PendingExecution};
pub use registry::CommandRegistry;
pub use registry_event::{CommandExecuted, CommandExecuting, UnhandledFailure};
pub use subscription::SubscriptionId;
