//! Node module: inbound serving and outbound requests.

use super::{NodeGuard, NodeManager, NodeRef, Tripper};
use crate::app::{App, Context, HandleGroup, RouterError};
use crate::error::{FabricError, CODE_INTERNAL_ERROR, CODE_NOT_FOUND};
use crate::identity::{IdentityStore, NodeId};
use crate::protocol::{Body, Request, Response};
use crate::runtime::{
    BoxError, Capabilities, Defer, ExtensionType, Initialize, Module, Registry,
};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Contributes routes to the node application router.
pub trait NodeAppModule: Send + Sync {
    fn setup_to_node(&self, router: &mut HandleGroup<'_>) -> Result<(), RouterError>;
}

/// Contributes a set of application modules, optionally under a name scope.
pub trait NodeAppModuleProvider: Send + Sync {
    /// Name prefix for every contributed route.
    fn node_scope(&self) -> Option<Vec<u8>> {
        None
    }

    fn node_app_modules(&self) -> Vec<Arc<dyn NodeAppModule>>;
}

/// Options for an outbound request.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoOptions {
    /// Bound on the round trip up to the decoded response header.
    pub timeout: Option<Duration>,
}

impl DoOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Owner of the identity store, the node manager and the application router.
pub struct NodeModule {
    identity: Arc<IdentityStore>,
    manager: Arc<NodeManager>,
    tripper: RwLock<Option<Arc<dyn Tripper>>>,
    app: RwLock<Option<Arc<App>>>,
    registry: OnceLock<Arc<Registry>>,
}

impl NodeModule {
    pub fn new() -> Self {
        Self {
            identity: Arc::new(IdentityStore::new()),
            manager: Arc::new(NodeManager::new()),
            tripper: RwLock::new(None),
            app: RwLock::new(None),
            registry: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    pub fn manager(&self) -> &Arc<NodeManager> {
        &self.manager
    }

    /// Current tripper; the node manager unless one was installed.
    pub fn tripper(&self) -> Arc<dyn Tripper> {
        let tripper = self.tripper.read().unwrap_or_else(PoisonError::into_inner);
        match tripper.as_ref() {
            Some(tripper) => tripper.clone(),
            None => self.manager.clone(),
        }
    }

    /// Install a tripper; `None` restores the default.
    pub fn set_tripper(&self, tripper: Option<Arc<dyn Tripper>>) {
        *self.tripper.write().unwrap_or_else(PoisonError::into_inner) = tripper;
    }

    fn app(&self) -> Option<Arc<App>> {
        self.app.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Serve one inbound node stream.
    ///
    /// Decodes the request from `reader`, runs the router, writes the
    /// response to `writer` and closes it. A handler error becomes code 500
    /// and an unhandled request code 404. The handler error, if any, is
    /// returned in preference to a write error.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W, node: NodeRef) -> Result<(), FabricError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin,
    {
        let mut ctx = Context::new();
        ctx.set_node(node);

        let result = match Request::unmarshal(reader).await {
            Ok(request) => {
                *ctx.request_mut() = request;
                match self.app() {
                    Some(app) => app.dispatch(&mut ctx).await.map_err(|e| {
                        ctx.throw_error(CODE_INTERNAL_ERROR, &e);
                        FabricError::internal(e)
                    }),
                    None => Err(FabricError::Unavailable),
                }
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e @ (FabricError::Unavailable | FabricError::Protocol(_))) = &result {
            ctx.throw_error(CODE_INTERNAL_ERROR, e);
        }
        if ctx.code() < 0 {
            ctx.throw_error(CODE_NOT_FOUND, FabricError::NotFound);
        }

        let response = ctx.take_response();
        let written = async {
            let mut body = response.marshal()?;
            tokio::io::copy(&mut body, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<_, FabricError>(())
        }
        .await;

        result.and(written)
    }

    /// Send `request` to `node_id` and decode the response.
    ///
    /// The response body streams from the peer and stays readable until the
    /// response is dropped.
    pub async fn do_request(
        &self,
        node_id: &NodeId,
        request: Request,
        opts: DoOptions,
    ) -> Result<Response, FabricError> {
        let body = request.marshal()?;
        let tripper = self.tripper();
        let trip = async {
            let reader = tripper.round_trip(node_id, body).await?;
            Ok::<_, FabricError>(Response::unmarshal(reader).await?)
        };
        match opts.timeout {
            Some(timeout) => tokio::time::timeout(timeout, trip).await?,
            None => trip.await,
        }
    }

    /// Build a request from its parts and send it.
    pub async fn request(
        &self,
        node_id: &NodeId,
        name: impl Into<Vec<u8>>,
        body: Body,
        opts: DoOptions,
    ) -> Result<Response, FabricError> {
        self.do_request(node_id, Request::new(name, body), opts).await
    }

    /// Run every enabled guard; the first refusal wins.
    pub fn access(&self, node_id: &NodeId) -> Result<(), FabricError> {
        let Some(registry) = self.registry.get() else {
            return Ok(());
        };
        registry.traverse::<dyn NodeGuard, _, _>(|guard| {
            if guard.enabled() {
                guard.access(node_id)
            } else {
                Ok(())
            }
        })
    }

    /// Admit `node` into the node manager.
    ///
    /// Fails with [`FabricError::Conflict`] if a handle with the same ids is
    /// already known.
    pub fn control(&self, node: NodeRef) -> Result<(), FabricError> {
        self.access(node.id())?;
        let (_, existed) = self.manager.search_or_store(node);
        if existed {
            return Err(FabricError::Conflict);
        }
        Ok(())
    }

    /// Rebuild the application router from the mounted app modules and
    /// swap it in.
    pub fn reload_modules(&self) -> Result<(), BoxError> {
        let registry = self.registry.get().ok_or(FabricError::Unavailable)?;
        let mut app = App::new();

        registry.traverse::<dyn NodeAppModule, _, _>(|module| {
            module.setup_to_node(&mut app.root())
        })?;

        registry.traverse::<dyn NodeAppModuleProvider, RouterError, _>(|provider| {
            let mut group = match provider.node_scope() {
                Some(scope) => app.route(scope)?,
                None => app.group()?,
            };
            for module in provider.node_app_modules() {
                module.setup_to_node(&mut group)?;
            }
            Ok(())
        })?;

        app.init(true);
        debug!(routes = app.route_count(), "Node application rebuilt");
        *self.app.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(app));
        Ok(())
    }
}

impl Default for NodeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for NodeModule {
    fn name(&self) -> &'static str {
        "node"
    }

    fn engine_types(&self) -> Vec<ExtensionType> {
        vec![
            ExtensionType::of::<dyn NodeAppModule>(),
            ExtensionType::of::<dyn NodeAppModuleProvider>(),
            ExtensionType::of::<dyn NodeGuard>(),
        ]
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        vec![self.identity.clone()]
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn Initialize>(self.clone())
            .add::<dyn Defer>(self);
    }
}

impl Initialize for NodeModule {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError> {
        let _ = self.registry.set(registry.clone());
        Ok(())
    }
}

impl Defer for NodeModule {
    fn defer(&self) -> Result<(), BoxError> {
        self.reload_modules()?;
        info!("Node application ready");
        Ok(())
    }
}
