//! Liveness application: `ping` answers `pong`.

use crate::app::{handler_fn, HandleGroup, RouterError};
use crate::node::NodeAppModule;
use crate::runtime::{Capabilities, Module};
use std::sync::Arc;

/// Request header copied back onto the response.
pub const ECHO_HEADER: &[u8] = b"echo";

#[derive(Default)]
pub struct PingModule;

impl PingModule {
    pub fn new() -> Self {
        Self
    }
}

impl NodeAppModule for PingModule {
    fn setup_to_node(&self, router: &mut HandleGroup<'_>) -> Result<(), RouterError> {
        router.handle(
            "ping",
            [handler_fn(|ctx| {
                let echo = ctx.request_header(ECHO_HEADER).map(<[u8]>::to_vec);
                if echo.is_some() {
                    ctx.set_header(ECHO_HEADER, echo);
                }
                ctx.respond_bytes("pong");
                Ok(())
            })],
        )?;
        Ok(())
    }
}

impl Module for PingModule {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn NodeAppModule>(self);
    }
}
