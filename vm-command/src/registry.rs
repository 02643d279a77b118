//! 命令注册表（CommandRegistry）
//!
//! - 以名称为键保存命令，并提供按规格构造命令的工厂方法；
//! - 为每条命令建立显式的订阅记录，把其生命周期事件带上名称转发为注册表级事件；
//! - 注册表级 `CommandExecuting` 的取消会传回原命令；
//! - 同名重复注册会替换旧条目，并先释放旧命令上的订阅；
//! - 所有活动同时以 [`CommandActivity`] 的形式经广播流发布。
//!
//! 典型用法：
//! ```rust
//! use vm_command::{CommandRegistry, CommandSpec};
//!
//! let registry = CommandRegistry::new();
//! registry.register("save", CommandSpec::sync(|doc: String| {
//!     println!("saving {doc}");
//!     Ok(())
//! }));
//! registry.on_command_executing(|ev| {
//!     if ev.parameter::<String>().is_some_and(|doc| doc.is_empty()) {
//!         ev.cancel();
//!     }
//! });
//!
//! let save = registry.lookup::<String>("save").unwrap();
//! assert!(save.execute(String::new()).unwrap().is_cancelled());
//! ```
//!
use crate::activity::{ActivityKind, CommandActivity};
use crate::command::Command;
use crate::command_spec::CommandSpec;
use crate::config::RegistryConfig;
use crate::error::{CommandError, CommandResult};
use crate::event_args::{CancelledArgs, ExecutedArgs, ExecutingArgs, FailedExecution};
use crate::execution::Execution;
use crate::registry_event::{CommandExecuted, CommandExecuting, UnhandledFailure};
use crate::subscription::{HandlerList, SubscriptionId};
use dashmap::DashMap;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::any::{Any, type_name};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

type ExecutingFn = dyn Fn(&mut CommandExecuting<'_>) + Send + Sync;

type ExecutedFn = dyn Fn(&CommandExecuted<'_>) + Send + Sync;

type UnhandledFn = dyn Fn(&UnhandledFailure<'_>) + Send + Sync;

/// 注册表条目：持有命令及其在命令上的订阅记录
trait RegisteredCommand: Send + Sync {
    fn command(&self) -> Arc<dyn Any + Send + Sync>;
    fn parameter_type(&self) -> &'static str;
    fn is_running(&self) -> bool;
    /// 退订条目在命令上建立的全部订阅
    fn release(&self);
}

struct Entry<P> {
    command: Arc<Command<P>>,
    subscriptions: Vec<SubscriptionId>,
}

impl<P> RegisteredCommand for Entry<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn command(&self) -> Arc<dyn Any + Send + Sync> {
        self.command.clone()
    }

    fn parameter_type(&self) -> &'static str {
        type_name::<P>()
    }

    fn is_running(&self) -> bool {
        self.command.is_running()
    }

    fn release(&self) {
        for id in &self.subscriptions {
            self.command.unsubscribe(*id);
        }
    }
}

struct RegistryInner {
    entries: DashMap<String, Box<dyn RegisteredCommand>>,
    executing: HandlerList<ExecutingFn>,
    executed: HandlerList<ExecutedFn>,
    unhandled: HandlerList<UnhandledFn>,
    activity: broadcast::Sender<CommandActivity>,
    config: RegistryConfig,
}

impl RegistryInner {
    fn forward_executing<P>(&self, name: &str, args: &mut ExecutingArgs<'_, P>)
    where
        P: Send + Sync + 'static,
    {
        let execution_id = args.execution_id();
        let mut event =
            CommandExecuting::new(name, execution_id, args.parameter(), args.is_cancelled());
        for handler in self.executing.snapshot() {
            handler(&mut event);
        }
        if event.is_cancelled() && !args.is_cancelled() {
            tracing::debug!(
                command = %name,
                %execution_id,
                "execution cancelled by registry subscriber"
            );
            args.cancel();
        }
        self.publish(CommandActivity::new(execution_id, name, ActivityKind::Started));
    }

    fn forward_executed<P>(&self, name: &str, args: &ExecutedArgs<'_, P>)
    where
        P: Send + Sync + 'static,
    {
        let event = CommandExecuted {
            name,
            execution_id: args.execution_id,
            parameter: args.parameter,
        };
        for handler in self.executed.snapshot() {
            handler(&event);
        }
        self.publish(CommandActivity::new(
            args.execution_id,
            name,
            ActivityKind::Completed,
        ));
    }

    fn forward_cancelled<P>(&self, name: &str, args: &CancelledArgs<'_, P>) {
        self.publish(CommandActivity::new(
            args.execution_id,
            name,
            ActivityKind::Cancelled,
        ));
    }

    fn forward_failed<P>(&self, name: &str, failed: &FailedExecution<'_, P>)
    where
        P: Send + Sync + 'static,
    {
        self.publish(CommandActivity::new(
            failed.execution_id,
            name,
            ActivityKind::Failed {
                reason: failed.error.to_string(),
                handled: failed.handled,
            },
        ));
        if failed.handled {
            return;
        }

        let handlers = self.unhandled.snapshot();
        if handlers.is_empty() {
            tracing::error!(
                command = %name,
                execution_id = %failed.execution_id,
                error = %failed.error,
                "unhandled async command failure"
            );
            return;
        }

        let event = UnhandledFailure {
            name,
            execution_id: failed.execution_id,
            error: failed.error,
            parameter: failed.parameter,
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn publish(&self, activity: CommandActivity) {
        // 无订阅者时 send 返回错误，视为非致命并忽略
        let _ = self.activity.send(activity);
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.value().release();
        }
    }
}

/// 命令注册表
///
/// 克隆得到的是同一注册表的句柄。
#[derive(Clone)]
pub struct CommandRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_config(RegistryConfig::default())
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let (activity, _rx) = broadcast::channel(config.activity_capacity.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                executing: HandlerList::default(),
                executed: HandlerList::default(),
                unhandled: HandlerList::default(),
                activity,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// 按规格构造命令并以 `name` 注册，返回新命令
    ///
    /// 同名条目已存在时被替换，旧命令上的转发订阅随即释放，旧命令此后的执行不再出现在
    /// 注册表事件中。
    pub fn register<P>(
        &self,
        name: impl Into<String>,
        spec: impl Into<CommandSpec<P>>,
    ) -> Arc<Command<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let name = name.into();
        let command = Arc::new(Command::with_policy(spec, self.inner.config.reentrancy));
        let subscriptions = self.wire(&name, &command);
        let entry = Entry {
            command: command.clone(),
            subscriptions,
        };

        let parameter = type_name::<P>();
        match self.inner.entries.insert(name.clone(), Box::new(entry)) {
            Some(previous) => {
                previous.release();
                tracing::debug!(command = %name, parameter, "command replaced");
            }
            None => {
                tracing::debug!(command = %name, parameter, "command registered");
            }
        }

        command
    }

    /// 按名称查找命令；名称未注册或参数类型不符时返回 `None`
    pub fn lookup<P>(&self, name: &str) -> Option<Arc<Command<P>>>
    where
        P: Clone + Send + Sync + 'static,
    {
        self.resolve::<P>(name).ok()
    }

    /// 按名称执行命令
    pub fn execute<P>(&self, name: &str, parameter: P) -> CommandResult<Execution>
    where
        P: Clone + Send + Sync + 'static,
    {
        self.resolve::<P>(name)?.execute(parameter)
    }

    /// 按名称评估启用谓词
    pub fn can_execute<P>(&self, name: &str, parameter: Option<&P>) -> CommandResult<bool>
    where
        P: Clone + Send + Sync + 'static,
    {
        Ok(self.resolve::<P>(name)?.can_execute(parameter))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.contains_key(name)
    }

    /// 已注册的命令名（按字典序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// 当前有调用在进行中的命令名（按字典序）
    pub fn running_commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().is_running())
            .map(|e| e.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn on_command_executing<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&mut CommandExecuting<'_>) + Send + Sync + 'static,
    {
        self.inner.executing.add(Arc::new(handler))
    }

    pub fn on_command_executed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CommandExecuted<'_>) + Send + Sync + 'static,
    {
        self.inner.executed.add(Arc::new(handler))
    }

    /// 未配置异常处理器的异步命令失败会转到这里；无订阅者时记录错误日志
    pub fn on_unhandled_failure<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&UnhandledFailure<'_>) + Send + Sync + 'static,
    {
        self.inner.unhandled.add(Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.executing.remove(id)
            || self.inner.executed.remove(id)
            || self.inner.unhandled.remove(id)
    }

    /// 订阅活动流；返回 'static 生命周期的流，便于在 tokio::spawn 中消费
    pub fn subscribe(&self) -> BoxStream<'static, CommandResult<CommandActivity>> {
        let rx = self.inner.activity.subscribe();
        Box::pin(
            BroadcastStream::new(rx).map(|r| r.map_err(|e| CommandError::Activity(e.to_string()))),
        )
    }

    fn resolve<P>(&self, name: &str) -> CommandResult<Arc<Command<P>>>
    where
        P: Clone + Send + Sync + 'static,
    {
        // 先取出并释放 DashMap 的引用，再做后续调用，避免在处理器内重入注册表时死锁
        let Some((command, found)) = self
            .inner
            .entries
            .get(name)
            .map(|e| (e.value().command(), e.value().parameter_type()))
        else {
            return Err(CommandError::NotFound(name.to_string()));
        };

        command
            .downcast::<Command<P>>()
            .map_err(|_| CommandError::TypeMismatch {
                expected: type_name::<P>(),
                found,
            })
    }

    /// 在命令上建立转发订阅；闭包只持有注册表的弱引用，避免 注册表 → 命令 → 注册表 的循环
    fn wire<P>(&self, name: &str, command: &Command<P>) -> Vec<SubscriptionId>
    where
        P: Clone + Send + Sync + 'static,
    {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let name: Arc<str> = Arc::from(name);

        let executing = {
            let (weak, name) = (weak.clone(), name.clone());
            command.on_executing(move |args| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward_executing(&name, args);
                }
            })
        };
        let executed = {
            let (weak, name) = (weak.clone(), name.clone());
            command.on_executed(move |args| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward_executed(&name, args);
                }
            })
        };
        let cancelled = {
            let (weak, name) = (weak.clone(), name.clone());
            command.on_cancelled(move |args| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward_cancelled(&name, args);
                }
            })
        };
        let failed = command.on_failed(move |failed| {
            if let Some(inner) = weak.upgrade() {
                inner.forward_failed(&name, failed);
            }
        });

        vec![executing, executed, cancelled, failed]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReentrancyPolicy;
    use std::collections::HashMap;
    use std::fmt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// 收集 error 级别事件的字段
    #[derive(Clone, Default)]
    struct ErrorEvents(Arc<Mutex<Vec<HashMap<&'static str, String>>>>);

    impl ErrorEvents {
        fn recorded(&self) -> Vec<HashMap<&'static str, String>> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FieldVisitor<'a>(&'a mut HashMap<&'static str, String>);

    impl Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name(), format!("{value:?}"));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for ErrorEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                let mut fields = HashMap::new();
                event.record(&mut FieldVisitor(&mut fields));
                self.0.lock().unwrap().push(fields);
            }
        }
    }

    fn failing_upload() -> crate::command_spec::AsyncCommandSpec<()> {
        CommandSpec::async_unit(|| async { Err(anyhow::anyhow!("offline")) })
    }

    #[test]
    fn lookup_unknown_or_wrong_type_is_none() {
        let registry = CommandRegistry::new();
        registry.register("inc", CommandSpec::sync(|_: i32| Ok(())));

        assert!(registry.lookup::<i32>("missing").is_none());
        assert!(registry.lookup::<String>("inc").is_none());
        assert!(registry.lookup::<i32>("inc").is_some());
    }

    #[test]
    fn execute_by_name_reports_not_found_and_type_mismatch() {
        let registry = CommandRegistry::new();
        registry.register("inc", CommandSpec::sync(|_: i32| Ok(())));

        match registry.execute("nope", 1_i32).unwrap_err() {
            CommandError::NotFound(name) => assert_eq!(name, "nope"),
            other => panic!("unexpected error: {other:?}"),
        }
        match registry.execute("inc", "text".to_string()).unwrap_err() {
            CommandError::TypeMismatch { expected, found } => {
                assert!(expected.contains("String"));
                assert_eq!(found, "i32");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            registry.execute("inc", 1_i32).unwrap(),
            Execution::Completed
        ));
    }

    #[test]
    fn can_execute_by_name() {
        let registry = CommandRegistry::new();
        registry.register(
            "delete",
            CommandSpec::sync(|_: u64| Ok(())).can_execute(|id: Option<&u64>| id.is_some()),
        );
        assert!(!registry.can_execute::<u64>("delete", None).unwrap());
        assert!(registry.can_execute("delete", Some(&7_u64)).unwrap());
        assert!(registry.can_execute::<u64>("other", None).is_err());
    }

    #[test]
    fn names_and_len_track_entries() {
        let registry = CommandRegistry::new();
        assert!(registry.is_empty());
        registry.register("b", CommandSpec::sync_unit(|| Ok(())));
        registry.register("a", CommandSpec::sync_unit(|| Ok(())));
        registry.register("b", CommandSpec::sync_unit(|| Ok(())));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }

    #[test]
    fn replaced_command_is_detached_from_registry_events() {
        let registry = CommandRegistry::new();
        let executed = Arc::new(Mutex::new(Vec::<String>::new()));
        let e = executed.clone();
        registry.on_command_executed(move |ev| e.lock().unwrap().push(ev.name.to_string()));

        let old = registry.register("x", CommandSpec::sync_unit(|| Ok(())));
        assert_eq!(old.subscriber_count(), 4);
        let new = registry.register("x", CommandSpec::sync_unit(|| Ok(())));
        assert_eq!(old.subscriber_count(), 0);
        assert_eq!(new.subscriber_count(), 4);

        old.execute(()).unwrap();
        assert!(executed.lock().unwrap().is_empty());

        new.execute(()).unwrap();
        assert_eq!(*executed.lock().unwrap(), vec!["x"]);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let registry = CommandRegistry::new();
        let r = registry.clone();
        let spawned = Arc::new(AtomicUsize::new(0));
        let s = spawned.clone();
        registry.on_command_executed(move |ev| {
            if ev.name == "first" {
                r.register("second", CommandSpec::sync_unit(|| Ok(())));
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.register("first", CommandSpec::sync_unit(|| Ok(())));
        registry.execute("first", ()).unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert!(registry.contains("second"));
    }

    #[test]
    fn unsubscribe_registry_handler() {
        let registry = CommandRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = registry.on_command_executing(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        registry.register("go", CommandSpec::sync_unit(|| Ok(())));

        registry.execute("go", ()).unwrap();
        assert!(registry.unsubscribe(id));
        registry.execute("go", ()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_registry_releases_forwarding() {
        let registry = CommandRegistry::new();
        let cmd = registry.register("keep", CommandSpec::sync_unit(|| Ok(())));
        assert_eq!(cmd.subscriber_count(), 4);
        drop(registry);
        assert_eq!(cmd.subscriber_count(), 0);
        // 注册表已释放，命令仍可独立执行
        assert!(matches!(cmd.execute(()).unwrap(), Execution::Completed));
    }

    #[test]
    fn commands_take_policy_from_config() {
        let registry = CommandRegistry::with_config(
            RegistryConfig::builder()
                .reentrancy(ReentrancyPolicy::Allow)
                .activity_capacity(8)
                .build(),
        );
        assert_eq!(registry.config().activity_capacity, 8);
        let cmd = registry.register("poll", CommandSpec::sync_unit(|| Ok(())));
        assert_eq!(cmd.policy(), registry.config().reentrancy);
    }

    #[tokio::test]
    async fn unobserved_async_failure_is_logged_with_command_and_id() {
        let events = ErrorEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let registry = CommandRegistry::new();
        registry.register("upload", failing_upload());

        let Execution::Pending(pending) = registry.execute("upload", ()).unwrap() else {
            panic!("async command must return a pending execution");
        };
        let id = pending.execution_id();
        assert!(pending.wait().await.is_err());

        let logged = events.recorded();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["command"], "upload");
        assert_eq!(logged[0]["execution_id"], id.to_string());
        assert_eq!(logged[0]["error"], "offline");
    }

    #[tokio::test]
    async fn replaced_command_failure_is_logged_not_forwarded() {
        let events = ErrorEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let registry = CommandRegistry::new();
        let unhandled = Arc::new(AtomicUsize::new(0));
        let u = unhandled.clone();
        registry.on_unhandled_failure(move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        });
        let old = registry.register("upload", failing_upload());
        registry.register("upload", CommandSpec::async_unit(|| async { Ok(()) }));

        let Execution::Pending(pending) = old.execute(()).unwrap() else {
            panic!("async command must return a pending execution");
        };
        let id = pending.execution_id();
        assert!(pending.wait().await.is_err());

        assert_eq!(unhandled.load(Ordering::SeqCst), 0);
        let logged = events.recorded();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["execution_id"], id.to_string());
        assert_eq!(logged[0]["error"], "offline");
        assert!(!logged[0].contains_key("command"));
    }
}
