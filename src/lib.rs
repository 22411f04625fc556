//! Pan: peer-to-peer node fabric
//!
//! Hosts discover each other over LAN multicast, open mutually
//! authenticated QUIC sessions, and exchange named request/response
//! messages dispatched through a pluggable application router.

pub mod app;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;
pub mod ping;
pub mod protocol;
pub mod runtime;
pub mod transport;
pub mod utils;

// Re-export error types
pub use error::{FabricError, CODE_INTERNAL_ERROR, CODE_NOT_FOUND, CODE_OK};

// Re-export config types
pub use config::{AppConfig, AppSettings, ConfigError, ConfigListener};

// Re-export identity types
pub use identity::{IdentityError, IdentityStore, NodeCredentials, NodeId, NodeSettingsListener};

// Re-export runtime types
pub use runtime::{BoxError, Engine, EngineError, Module, Registry};

// Re-export protocol types
pub use protocol::{Body, Header, ProtocolError, Request, Response};

// Re-export application types
pub use app::{App, Context, HandleGroup, RouterError};

// Re-export node types
pub use node::{
    DoOptions, Node, NodeAppModule, NodeAppModuleProvider, NodeGuard, NodeManager, NodeModule,
    NodeRef, NodeType, SettingsGuard, Tripper,
};

// Re-export transport types
pub use broadcast::{BroadcastError, BroadcastHandler, BroadcastModule, Broadcaster};
pub use transport::quic::{Announcement, QuicModule};
pub use transport::TransportError;
