//! 订阅记录（Subscription）
//!
//! 命令与注册表的事件都以显式的订阅记录保存，订阅时返回 `SubscriptionId`，
//! 可据此精确退订；注册表替换同名条目时依赖这一点释放旧命令上的订阅。
//!
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// 订阅标识，进程内唯一；同一对象上不同事件的订阅可统一用 `unsubscribe` 退订
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 某一类事件的处理器列表
pub(crate) struct HandlerList<H: ?Sized> {
    handlers: RwLock<Vec<(SubscriptionId, Arc<H>)>>,
}

impl<H: ?Sized> Default for HandlerList<H> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> HandlerList<H> {
    pub(crate) fn add(&self, handler: Arc<H>) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// 按订阅顺序复制一份处理器列表；分发期间不持有锁，处理器内可再订阅/退订
    pub(crate) fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers.read().iter().map(|(_, h)| h.clone()).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
