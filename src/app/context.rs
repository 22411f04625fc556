//! Request context.

use crate::error::CODE_OK;
use crate::node::NodeRef;
use crate::protocol::{bytes_body, Body, Header, Request, Response};
use crate::utils::SortedItems;
use std::any::Any;
use std::fmt;

/// Session key under which the serving node handle is stored.
pub const CONTEXT_NODE: &[u8] = b"NODE";

type SessionItem = (Vec<u8>, Box<dyn Any + Send + Sync>);

fn session_key(item: &SessionItem) -> &[u8] {
    &item.0
}

/// State threaded through a handler chain: the decoded request, the
/// response being built and a per-request session map.
pub struct Context {
    request: Request,
    response: Response,
    session: SortedItems<SessionItem, [u8]>,
}

impl Context {
    /// Context for an empty request; the response code starts at `-1`.
    pub fn new() -> Self {
        Self::with_request(Request::default())
    }

    pub fn with_request(request: Request) -> Self {
        Self {
            request,
            response: Response::new(),
            session: SortedItems::new(session_key),
        }
    }

    // === Request ===

    /// Name of the request being served.
    pub fn name(&self) -> &[u8] {
        self.request.name()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn request_header(&self, key: &[u8]) -> Option<&[u8]> {
        self.request.header().get(key)
    }

    pub fn request_body(&mut self) -> &mut Body {
        self.request.body_mut()
    }

    // === Response ===

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Take the response out, leaving a fresh one behind.
    pub fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    pub fn code(&self) -> i32 {
        self.response.code()
    }

    pub fn set_code(&mut self, code: i32) {
        self.response.set_code(code);
    }

    pub fn header(&self) -> &Header {
        self.response.header()
    }

    /// Set a response header; `None` removes it.
    pub fn set_header(&mut self, key: impl Into<Vec<u8>>, value: Option<Vec<u8>>) {
        let key = key.into();
        match value {
            Some(value) => {
                self.response.header_mut().set(key, value);
            }
            None => {
                self.response.header_mut().remove(&key);
            }
        }
    }

    /// Answer with `body` and code 0.
    pub fn respond(&mut self, body: Body) {
        self.response.set_body(body);
        self.response.set_code(CODE_OK);
    }

    /// Answer with owned bytes and code 0.
    pub fn respond_bytes(&mut self, body: impl Into<Vec<u8>>) {
        self.respond(bytes_body(body));
    }

    /// Answer with `code` and the error text as body.
    pub fn throw_error(&mut self, code: i32, err: impl fmt::Display) {
        self.response.set_code(code);
        self.response.set_body(bytes_body(err.to_string()));
    }

    // === Session ===

    /// Session value under `key`, if present and of type `T`.
    pub fn session<T: Any>(&self, key: &[u8]) -> Option<&T> {
        self.session.get(key).and_then(|(_, value)| value.downcast_ref())
    }

    /// Store a session value, replacing any previous one.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<Vec<u8>>, value: T) {
        self.session.swap((key.into(), Box::new(value)));
    }

    pub fn del(&mut self, key: &[u8]) {
        self.session.delete(key);
    }

    /// Node handle the request arrived on.
    pub fn node(&self) -> Option<NodeRef> {
        self.session::<NodeRef>(CONTEXT_NODE).cloned()
    }

    pub fn set_node(&mut self, node: NodeRef) {
        self.set(CONTEXT_NODE, node);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("session", &self.session.len())
            .finish()
    }
}
