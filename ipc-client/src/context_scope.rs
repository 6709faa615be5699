//! The task-local "current execution context" (spec §5 "Execution-context
//! discipline", §9 "Ambient call context through nested calls"). Pinned for
//! the duration of a single incoming-CALL handler invocation via
//! `CURRENT_CONTEXT.scope(ctx, future).await`, so any `call()` the handler
//! issues inherits it automatically — this is the sole mechanism of
//! automatic context propagation. Concurrent handler invocations each run
//! inside their own `.scope()` and so see independent contexts; there is no
//! process-global slot anywhere in this module.

use ipc_core::IpcContext;

tokio::task_local! {
    static CURRENT_CONTEXT: IpcContext;
}

/// Runs `future` with `ctx` pinned as the current execution context. The
/// pin is restored on every exit path — including the handler panicking or
/// returning an error — because `task_local!`'s scope is an RAII guard
/// around the future's own lifetime, not a value a handler could forget to
/// clear.
pub async fn with_context<F, T>(ctx: IpcContext, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CONTEXT.scope(ctx, future).await
}

/// The context pinned by the innermost enclosing `with_context`, if any.
/// `None` outside of any handler dispatch (e.g. a client's top-level call).
pub fn current() -> Option<IpcContext> {
    CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}
