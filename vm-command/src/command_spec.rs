//! 命令构造描述（CommandSpec）
//!
//! 描述一条命令由哪些部分组成：执行体（同步/异步）、可选的启用谓词、
//! 以及仅异步执行体可用的异常处理器。
//!
//! ```rust
//! use vm_command::CommandSpec;
//!
//! let save = CommandSpec::sync(|n: i32| {
//!     println!("save {n}");
//!     Ok(())
//! })
//! .can_execute(|p: Option<&i32>| p.is_some_and(|n| *n > 0));
//!
//! let refresh = CommandSpec::async_unit(|| async { Ok(()) })
//!     .on_error(|failed| eprintln!("refresh failed: {}", failed.error));
//! # let _ = (save, refresh);
//! ```
//!
use crate::command_handler::AsyncCommandHandler;
use crate::event_args::FailedExecution;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub(crate) type Predicate<P> = Arc<dyn Fn(Option<&P>) -> bool + Send + Sync>;

pub(crate) type SyncBody<P> = Arc<dyn Fn(P) -> anyhow::Result<()> + Send + Sync>;

pub(crate) type AsyncBody<P> =
    Arc<dyn Fn(P) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) type ErrorHandler<P> = Arc<dyn for<'a> Fn(&FailedExecution<'a, P>) + Send + Sync>;

pub(crate) enum Body<P> {
    Sync(SyncBody<P>),
    Async {
        run: AsyncBody<P>,
        on_error: Option<ErrorHandler<P>>,
    },
}

/// 命令构造描述
pub struct CommandSpec<P> {
    pub(crate) body: Body<P>,
    pub(crate) predicate: Option<Predicate<P>>,
}

impl<P> CommandSpec<P>
where
    P: Send + Sync + 'static,
{
    /// 同步执行体
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            body: Body::Sync(Arc::new(f)),
            predicate: None,
        }
    }

    /// 异步执行体；返回的 `AsyncCommandSpec` 可额外配置异常处理器
    pub fn asynchronous<F, Fut>(f: F) -> AsyncCommandSpec<P>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        AsyncCommandSpec {
            run: Arc::new(move |p: P| f(p).boxed()),
            predicate: None,
            on_error: None,
        }
    }

    /// 以 [`AsyncCommandHandler`] 作为异步执行体
    pub fn from_handler<H>(handler: Arc<H>) -> AsyncCommandSpec<P>
    where
        H: AsyncCommandHandler<P> + 'static,
    {
        AsyncCommandSpec {
            run: Arc::new(move |p: P| {
                let handler = handler.clone();
                async move { handler.handle(p).await }.boxed()
            }),
            predicate: None,
            on_error: None,
        }
    }

    /// 启用谓词；未设置时命令始终可执行
    pub fn can_execute<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&P>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.body, Body::Async { .. })
    }
}

impl CommandSpec<()> {
    /// 无参同步执行体
    pub fn sync_unit<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::sync(move |()| f())
    }

    /// 无参异步执行体
    pub fn async_unit<F, Fut>(f: F) -> AsyncCommandSpec<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::asynchronous(move |()| f())
    }
}

/// 异步命令构造描述
pub struct AsyncCommandSpec<P> {
    run: AsyncBody<P>,
    predicate: Option<Predicate<P>>,
    on_error: Option<ErrorHandler<P>>,
}

impl<P> AsyncCommandSpec<P>
where
    P: Send + Sync + 'static,
{
    pub fn can_execute<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&P>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// 异常处理器：异步执行体失败时恰好调用一次
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&FailedExecution<'a, P>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl<P> From<AsyncCommandSpec<P>> for CommandSpec<P> {
    fn from(spec: AsyncCommandSpec<P>) -> Self {
        Self {
            body: Body::Async {
                run: spec.run,
                on_error: spec.on_error,
            },
            predicate: spec.predicate,
        }
    }
}
