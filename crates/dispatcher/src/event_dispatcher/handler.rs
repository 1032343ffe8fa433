use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use tabletop_core::{GameEvent, RuntimeResult};

/// 事件处理器
///
/// 返回 `Err` 时事件会被重新放回队首重试。
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &GameEvent) -> RuntimeResult<()>;
}

struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuntimeResult<()>> + Send + 'static,
{
    async fn handle(&self, event: &GameEvent) -> RuntimeResult<()> {
        (self.f)(event.clone()).await
    }
}

/// 把异步闭包包装成 [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuntimeResult<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}
