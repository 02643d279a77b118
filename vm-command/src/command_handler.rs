use async_trait::async_trait;

/// 异步命令处理器
///
/// 适合把执行体放在视图模型或服务对象上实现，
/// 通过 [`CommandSpec::from_handler`](crate::command_spec::CommandSpec::from_handler) 注册。
#[async_trait]
pub trait AsyncCommandHandler<P>: Send + Sync
where
    P: Send + 'static,
{
    async fn handle(&self, parameter: P) -> anyhow::Result<()>;
}
