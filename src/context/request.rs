use std::future::Future;

use tokio::task::JoinHandle;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Ambient per-request context, visible to everything awaited inside
/// [`run_with_context`] and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub organization_id: String,
}

/// Run `fut` with `organization_id` as the ambient organization.
///
/// The scope is bound to the future, not the thread: concurrently polled
/// futures each see their own value across every suspension point, and an
/// inner call shadows an outer one until it completes.
pub async fn run_with_context<F>(organization_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    let ctx = RequestContext {
        organization_id: organization_id.into(),
    };
    REQUEST_CONTEXT.scope(ctx, fut).await
}

pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

pub fn current_organization_id() -> Option<String> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.organization_id.clone()).ok()
}

/// True while executing inside a request call graph
pub fn is_active() -> bool {
    REQUEST_CONTEXT.try_with(|_| ()).is_ok()
}

/// `tokio::spawn` that carries the current context into the new task.
/// Task-locals are not inherited by spawned tasks otherwise.
pub fn spawn_with_context<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(REQUEST_CONTEXT.scope(ctx, fut)),
        None => tokio::spawn(fut),
    }
}
