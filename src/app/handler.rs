//! Handler chains.
//!
//! A handler receives the request context and a [`Next`] continuation. It
//! either calls `next.run(ctx)` to pass control down the chain or returns
//! to stop it.

use super::Context;
use crate::runtime::BoxError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Result of running a handler.
pub type HandlerResult = Result<(), BoxError>;

/// Future returned by [`Handler::call`].
pub type HandlerFuture<'a> = BoxFuture<'a, HandlerResult>;

/// Shared handler reference.
pub type HandlerRef = Arc<dyn Handler>;

/// One step of a handler chain.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> HandlerFuture<'a>;
}

/// Continuation of a handler chain.
///
/// When the chain is exhausted, control passes to the parent continuation,
/// and from the outermost one back to the dispatcher.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [HandlerRef],
    parent: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// A continuation that does nothing.
    pub fn end() -> Self {
        Self {
            chain: &[],
            parent: None,
        }
    }

    /// Run `chain`, then continue with `parent`.
    pub fn new(chain: &'a [HandlerRef], parent: Option<&'a Next<'a>>) -> Self {
        Self { chain, parent }
    }

    /// Invoke the next handler.
    pub fn run<'b>(self, ctx: &'b mut Context) -> HandlerFuture<'b>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((head, rest)) => head.call(
                ctx,
                Next {
                    chain: rest,
                    parent: self.parent,
                },
            ),
            None => match self.parent {
                Some(parent) => parent.run(ctx),
                None => Box::pin(async { Ok(()) }),
            },
        }
    }
}

/// Terminal handler built from a synchronous function.
///
/// The chain stops after the function runs.
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> HandlerFuture<'a> {
        let result = (self.0)(ctx);
        Box::pin(async move { result })
    }
}

/// Wrap a function as a terminal handler.
pub fn handler_fn<F>(f: F) -> HandlerRef
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Middleware built from a synchronous function.
///
/// The function runs before the rest of the chain; returning an error
/// stops the chain.
pub struct MiddlewareFn<F>(F);

impl<F> Handler for MiddlewareFn<F>
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            (self.0)(ctx)?;
            next.run(ctx).await
        })
    }
}

/// Wrap a function as a pass-through middleware.
pub fn middleware_fn<F>(f: F) -> HandlerRef
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(MiddlewareFn(f))
}

/// Runs `chain` only for requests whose name starts with `prefix`.
pub(super) struct PrefixHandler {
    pub(super) prefix: Vec<u8>,
    pub(super) chain: Vec<HandlerRef>,
}

impl Handler for PrefixHandler {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> HandlerFuture<'a> {
        if !ctx.name().starts_with(&self.prefix) {
            return next.run(ctx);
        }
        Box::pin(async move {
            let scoped = Next::new(&self.chain, Some(&next));
            scoped.run(ctx).await
        })
    }
}
