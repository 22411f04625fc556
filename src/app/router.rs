//! Route table and handle groups.

use super::handler::{HandlerRef, Next, PrefixHandler};
use super::{Context, RouterError};
use crate::runtime::BoxError;
use crate::utils::SortedItems;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

struct Route {
    name: Vec<u8>,
    chain: Arc<[HandlerRef]>,
}

fn route_name(route: &Route) -> &[u8] {
    &route.name
}

struct GroupDefaults {
    seq: u16,
    chain: Vec<HandlerRef>,
}

fn group_seq(defaults: &GroupDefaults) -> &u16 {
    &defaults.seq
}

struct GroupState {
    prefix: Vec<u8>,
    middlewares: Vec<HandlerRef>,
}

/// Mutable registration state, dropped by an extreme [`App::init`].
struct Builder {
    groups: Vec<GroupState>,
    defaults: SortedItems<GroupDefaults, u16>,
}

/// Application router.
///
/// Requests are dispatched by exact name to a route chain, which falls
/// through to the default chain when it calls `next` at its end. Requests
/// without a route run the default chain alone.
pub struct App {
    routes: SortedItems<Route, [u8]>,
    defaults: Arc<[HandlerRef]>,
    builder: Option<Builder>,
}

impl App {
    pub fn new() -> Self {
        Self {
            routes: SortedItems::new(route_name),
            defaults: Arc::from(Vec::new()),
            builder: Some(Builder {
                groups: vec![GroupState {
                    prefix: Vec::new(),
                    middlewares: Vec::new(),
                }],
                defaults: SortedItems::new(group_seq),
            }),
        }
    }

    /// The top-level group.
    pub fn root(&mut self) -> HandleGroup<'_> {
        HandleGroup { app: self, seq: 0 }
    }

    /// New group without a name prefix.
    pub fn group(&mut self) -> Result<HandleGroup<'_>, RouterError> {
        self.new_group(Vec::new())
    }

    /// New group whose routes and defaults are scoped to `prefix`.
    pub fn route(&mut self, prefix: impl Into<Vec<u8>>) -> Result<HandleGroup<'_>, RouterError> {
        self.new_group(prefix.into())
    }

    fn new_group(&mut self, prefix: Vec<u8>) -> Result<HandleGroup<'_>, RouterError> {
        let builder = self.builder.as_mut().ok_or(RouterError::Sealed)?;
        let seq = u16::try_from(builder.groups.len()).map_err(|_| RouterError::TooManyGroups)?;
        builder.groups.push(GroupState {
            prefix,
            middlewares: Vec::new(),
        });
        Ok(HandleGroup { app: self, seq })
    }

    /// Concatenate every group's default chain in group creation order.
    ///
    /// With `extreme`, registration state is dropped and later changes fail
    /// with [`RouterError::Sealed`].
    pub fn init(&mut self, extreme: bool) {
        if let Some(builder) = &self.builder {
            let chain: Vec<HandlerRef> = builder
                .defaults
                .iter()
                .flat_map(|d| d.chain.iter().cloned())
                .collect();
            self.defaults = Arc::from(chain);
        }
        if extreme {
            self.builder = None;
        }
    }

    /// Check if registration is still possible.
    pub fn is_sealed(&self) -> bool {
        self.builder.is_none()
    }

    /// Number of exact-name routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Run the route or default chain for `ctx`.
    ///
    /// The response code is left untouched when nothing handles the
    /// request.
    pub async fn dispatch(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let defaults = Next::new(&self.defaults, None);
        let route = self.routes.get(ctx.name()).map(|r| r.chain.clone());
        match route {
            Some(chain) => {
                trace!(name = %String::from_utf8_lossy(ctx.name()), "Dispatching route");
                Next::new(&chain, Some(&defaults)).run(ctx).await
            }
            None => defaults.run(ctx).await,
        }
    }

    fn builder(&mut self) -> Result<&mut Builder, RouterError> {
        self.builder.as_mut().ok_or(RouterError::Sealed)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .routes
            .iter()
            .map(|r| String::from_utf8_lossy(&r.name).into_owned())
            .collect();
        f.debug_struct("App")
            .field("routes", &names)
            .field("defaults", &self.defaults.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Registration scope: a name prefix plus accumulated middlewares.
pub struct HandleGroup<'a> {
    app: &'a mut App,
    seq: u16,
}

impl HandleGroup<'_> {
    fn state(&mut self) -> Result<&mut GroupState, RouterError> {
        let seq = usize::from(self.seq);
        self.app
            .builder()?
            .groups
            .get_mut(seq)
            .ok_or(RouterError::Sealed)
    }

    /// Name prefix of this group.
    pub fn prefix(&mut self) -> Result<Vec<u8>, RouterError> {
        Ok(self.state()?.prefix.clone())
    }

    /// Add middlewares applied to later registrations in this group.
    pub fn middleware(
        &mut self,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> Result<&mut Self, RouterError> {
        self.state()?.middlewares.extend(handlers);
        Ok(self)
    }

    /// Register an exact-name route under this group's prefix.
    pub fn handle(
        &mut self,
        name: impl AsRef<[u8]>,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> Result<&mut Self, RouterError> {
        let state = self.state()?;
        let mut full = state.prefix.clone();
        full.extend_from_slice(name.as_ref());
        let chain: Vec<HandlerRef> = state
            .middlewares
            .iter()
            .cloned()
            .chain(handlers)
            .collect();

        self.app
            .routes
            .store(Route {
                name: full.clone(),
                chain: Arc::from(chain),
            })
            .map_err(|_| RouterError::DuplicateRoute(String::from_utf8_lossy(&full).into_owned()))?;
        Ok(self)
    }

    /// Replace this group's default chain; an empty list removes it.
    ///
    /// Defaults of a prefixed group only run for names under the prefix.
    pub fn default(
        &mut self,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> Result<&mut Self, RouterError> {
        let seq = self.seq;
        let state = self.state()?;
        let handlers: Vec<HandlerRef> = handlers.into_iter().collect();

        let chain = if handlers.is_empty() {
            Vec::new()
        } else {
            let chain: Vec<HandlerRef> = state.middlewares.iter().cloned().chain(handlers).collect();
            if state.prefix.is_empty() {
                chain
            } else {
                vec![Arc::new(PrefixHandler {
                    prefix: state.prefix.clone(),
                    chain,
                }) as HandlerRef]
            }
        };

        let defaults = &mut self.app.builder()?.defaults;
        if chain.is_empty() {
            defaults.delete(&seq);
        } else {
            defaults.swap(GroupDefaults { seq, chain });
        }
        Ok(self)
    }

    /// New unprefixed group.
    pub fn group(&mut self) -> Result<HandleGroup<'_>, RouterError> {
        self.app.group()
    }

    /// New group scoped to `prefix`.
    pub fn route(&mut self, prefix: impl Into<Vec<u8>>) -> Result<HandleGroup<'_>, RouterError> {
        self.app.route(prefix)
    }
}
