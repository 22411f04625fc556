//! Application Router
//!
//! Requests arriving on node streams are dispatched by name through handler
//! chains. Groups scope registrations to a name prefix and accumulate
//! middlewares; every group may contribute to the default chain that runs
//! after a route or when no route matches.

mod context;
mod handler;
mod router;

use thiserror::Error;

pub use context::{Context, CONTEXT_NODE};
pub use handler::{
    handler_fn, middleware_fn, Handler, HandlerFn, HandlerFuture, HandlerRef, HandlerResult,
    MiddlewareFn, Next,
};
pub use router::{App, HandleGroup};

/// Errors from route registration.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("duplicate route: {0}")]
    DuplicateRoute(String),

    #[error("router is sealed")]
    Sealed,

    #[error("too many handle groups")]
    TooManyGroups,
}
