use anyhow::anyhow;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vm_command::{ActivityKind, CommandRegistry, CommandSpec};

/// 一个极简的“视图模型”：注册命令，并用活动流驱动忙碌指示
struct DocumentViewModel {
    commands: CommandRegistry,
    dirty: Arc<AtomicBool>,
}

impl DocumentViewModel {
    fn new() -> Self {
        let commands = CommandRegistry::new();
        let dirty = Arc::new(AtomicBool::new(true));

        let d = dirty.clone();
        commands.register(
            "save",
            CommandSpec::asynchronous(move |path: String| {
                let d = d.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    println!("saved to {path}");
                    d.store(false, Ordering::SeqCst);
                    Ok(())
                }
            })
            .can_execute({
                let d = dirty.clone();
                move |path: Option<&String>| {
                    d.load(Ordering::SeqCst) && path.is_some_and(|p| !p.is_empty())
                }
            })
            .on_error(|failed| eprintln!("save failed: {}", failed.error)),
        );

        commands.register(
            "sync",
            CommandSpec::async_unit(|| async { Err(anyhow!("remote unavailable")) }),
        );

        commands.register(
            "close",
            CommandSpec::sync_unit(|| {
                println!("closing document");
                Ok(())
            }),
        );

        Self { commands, dirty }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let vm = DocumentViewModel::new();

    // 忙碌指示：统计进行中的执行
    let mut activity = vm.commands.subscribe();
    let indicator = tokio::spawn(async move {
        let mut busy = 0usize;
        while let Some(next) = activity.next().await {
            let record = match next {
                Ok(record) => record,
                Err(err) => {
                    // 落后于广播缓冲时丢失部分记录，继续消费后续记录
                    eprintln!("activity stream: {err}");
                    continue;
                }
            };
            match record.kind {
                ActivityKind::Started => busy += 1,
                _ => busy = busy.saturating_sub(1),
            }
            println!("[busy={busy}] {} {:?}", record.command, record.kind);
        }
    });

    // 全局前置校验：文档未修改时拒绝关闭
    let dirty = vm.dirty.clone();
    vm.commands.on_command_executing(move |ev| {
        if ev.name() == "close" && dirty.load(Ordering::SeqCst) {
            println!("close refused: unsaved changes");
            ev.cancel();
        }
    });
    vm.commands
        .on_unhandled_failure(|f| eprintln!("command {} failed: {}", f.name, f.error));

    let path = "notes.txt".to_string();
    println!(
        "save enabled: {}",
        vm.commands.can_execute("save", Some(&path))?
    );

    vm.commands.execute("close", ())?;
    vm.commands.execute("save", path)?.wait().await?;
    vm.commands.execute("close", ())?;
    let _ = vm.commands.execute("sync", ())?.wait().await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    indicator.abort();
    Ok(())
}
