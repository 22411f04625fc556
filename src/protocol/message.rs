//! Request and response envelopes.
//!
//! ```text
//! Request  = [name_len:4 BE][name][header_size:4 BE][header block][body..EOF]
//! Response = [code:4 BE][header_size:4 BE][header block][body..EOF]
//! ```
//!
//! Marshalling prepends the fixed prefixes to the caller's body reader.
//! Unmarshalling reads the prefixes and hands back the remainder of the
//! carrier stream as the body, so bodies are never buffered here.

use super::header::Header;
use super::segment::{check_size, put_segment, read_exact_limited, read_segment};
use super::{ProtocolError, MAX_HEADER_SIZE};
use crate::error::{CODE_INTERNAL_ERROR, CODE_NOT_FOUND, CODE_OK};
use std::fmt;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A lazily-read message body.
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

/// A body with no bytes.
pub fn empty_body() -> Body {
    Box::new(tokio::io::empty())
}

/// A body over owned bytes.
pub fn bytes_body(data: impl Into<Vec<u8>>) -> Body {
    Box::new(Cursor::new(data.into()))
}

fn put_header_block(prefix: &mut Vec<u8>, header: &Header) -> Result<(), ProtocolError> {
    let block = header.marshal()?;
    if block.len() > MAX_HEADER_SIZE {
        return Err(ProtocolError::TooLarge(block.len()));
    }
    let size = block.len() as u32;
    prefix.extend_from_slice(&size.to_be_bytes());
    prefix.extend_from_slice(&block);
    Ok(())
}

async fn read_header_block<R>(reader: &mut R) -> Result<Header, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await? as usize;
    check_size(size, MAX_HEADER_SIZE, "header block")?;
    let block = read_exact_limited(reader, size, "header block").await?;
    Header::unmarshal(&block)
}

async fn drain(body: &mut Body) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    body.read_to_end(&mut data).await?;
    Ok(data)
}

// ============================================================================
// Request
// ============================================================================

/// An application request: a routable name, header items and a body.
pub struct Request {
    name: Vec<u8>,
    header: Header,
    body: Body,
}

impl Request {
    /// Create a request with an empty header.
    pub fn new(name: impl Into<Vec<u8>>, body: Body) -> Self {
        Self {
            name: name.into(),
            header: Header::new(),
            body,
        }
    }

    /// Create a request with an empty body.
    pub fn named(name: impl Into<Vec<u8>>) -> Self {
        Self::new(name, empty_body())
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<Vec<u8>>) {
        self.name = name.into();
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Take the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, empty_body())
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Read the remaining body bytes.
    pub async fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        drain(&mut self.body).await
    }

    /// Serialize into a reader of the framed request.
    pub fn marshal(self) -> Result<Body, ProtocolError> {
        if self.name.len() > MAX_HEADER_SIZE {
            return Err(ProtocolError::TooLarge(self.name.len()));
        }
        let mut prefix = Vec::new();
        put_segment(&mut prefix, &self.name)?;
        put_header_block(&mut prefix, &self.header)?;
        Ok(Box::new(Cursor::new(prefix).chain(self.body)))
    }

    /// Decode a request; the body stays a view of `reader`.
    pub async fn unmarshal<R>(mut reader: R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let name = read_segment(&mut reader, MAX_HEADER_SIZE, "request name").await?;
        let header = read_header_block(&mut reader).await?;
        Ok(Self {
            name,
            header,
            body: Box::new(reader),
        })
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::named(Vec::new())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Response
// ============================================================================

/// An application response.
///
/// A negative code means no handler has responded yet.
pub struct Response {
    code: i32,
    header: Header,
    body: Body,
}

impl Response {
    /// Create an uninitialised response (code `-1`, empty body).
    pub fn new() -> Self {
        Self {
            code: -1,
            header: Header::new(),
            body: empty_body(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn set_code(&mut self, code: i32) {
        self.code = code;
    }

    /// Check if the code is the success code.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Check if the code is the not-found code.
    pub fn is_not_found(&self) -> bool {
        self.code == CODE_NOT_FOUND
    }

    /// Check if the code is the internal-error code.
    pub fn is_internal_error(&self) -> bool {
        self.code == CODE_INTERNAL_ERROR
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Take the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, empty_body())
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Read the remaining body bytes.
    pub async fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        drain(&mut self.body).await
    }

    /// Serialize into a reader of the framed response.
    pub fn marshal(self) -> Result<Body, ProtocolError> {
        let mut prefix = Vec::with_capacity(8);
        prefix.extend_from_slice(&(self.code as u32).to_be_bytes());
        put_header_block(&mut prefix, &self.header)?;
        Ok(Box::new(Cursor::new(prefix).chain(self.body)))
    }

    /// Decode a response; the body stays a view of `reader`.
    pub async fn unmarshal<R>(mut reader: R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let code = reader.read_u32().await? as i32;
        let header = read_header_block(&mut reader).await?;
        Ok(Self {
            code,
            header,
            body: Box::new(reader),
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("code", &self.code)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn collect(mut body: Body) -> Vec<u8> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn test_request_wire_layout() {
        let mut request = Request::new("ping", bytes_body("hi"));
        request.header_mut().set("k", "v");

        let wire = collect(request.marshal().unwrap()).await;
        let mut expected = vec![0, 0, 0, 4];
        expected.extend_from_slice(b"ping");
        expected.extend_from_slice(&[0, 0, 0, 10]);
        expected.extend_from_slice(&[0, 0, 0, 1, b'k', 0, 0, 0, 1, b'v']);
        expected.extend_from_slice(b"hi");
        assert_eq!(wire, expected);
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let mut request = Request::new("files/list", bytes_body(vec![7u8; 5000]));
        request.header_mut().set("a", "1");
        request.header_mut().set("b", "");

        let wire = collect(request.marshal().unwrap()).await;
        let mut decoded = Request::unmarshal(Cursor::new(wire)).await.unwrap();

        assert_eq!(decoded.name(), b"files/list");
        assert_eq!(decoded.header().len(), 2);
        assert_eq!(decoded.header().get(b"a"), Some(b"1".as_slice()));
        assert_eq!(decoded.read_body().await.unwrap(), vec![7u8; 5000]);
    }

    #[tokio::test]
    async fn test_response_negative_code() {
        let mut response = Response::new();
        assert_eq!(response.code(), -1);
        response.set_code(-42);

        let wire = collect(response.marshal().unwrap()).await;
        assert_eq!(&wire[..4], &(-42i32 as u32).to_be_bytes());

        let decoded = Response::unmarshal(Cursor::new(wire)).await.unwrap();
        assert_eq!(decoded.code(), -42);
    }

    #[tokio::test]
    async fn test_response_roundtrip() {
        let mut response = Response::new();
        response.set_code(CODE_OK);
        response.header_mut().set("content-type", "text/plain");
        response.set_body(bytes_body("pong"));

        let wire = collect(response.marshal().unwrap()).await;
        let mut decoded = Response::unmarshal(Cursor::new(wire)).await.unwrap();

        assert!(decoded.is_ok());
        assert_eq!(
            decoded.header().get(b"content-type"),
            Some(b"text/plain".as_slice())
        );
        assert_eq!(decoded.read_body().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_truncated_header_block() {
        // name "a", header size 20 but only 3 bytes follow
        let wire = vec![0, 0, 0, 1, b'a', 0, 0, 0, 20, 1, 2, 3];
        let err = Request::unmarshal(Cursor::new(wire)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[tokio::test]
    async fn test_oversized_lengths_are_refused() {
        let wire = vec![0xff, 0xff, 0xff, 0xf0, b'a'];
        let err = Request::unmarshal(Cursor::new(wire)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Oversized { what: "request name", .. }));

        let mut wire = vec![0, 0, 0, 1, b'a'];
        wire.extend_from_slice(&((MAX_HEADER_SIZE + 1) as u32).to_be_bytes());
        let err = Request::unmarshal(Cursor::new(wire)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Oversized { what: "header block", .. }));

        let mut wire = vec![0, 0, 0, 0];
        wire.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = Response::unmarshal(Cursor::new(wire)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Oversized { .. }));

        let mut request = Request::new("big", empty_body());
        request.header_mut().set("k", vec![0u8; MAX_HEADER_SIZE]);
        assert!(matches!(request.marshal(), Err(ProtocolError::TooLarge(_))));
    }

    #[tokio::test]
    async fn test_body_is_streamed() {
        // The body reader must see bytes written after the prefixes were decoded.
        let (mut client, server) = tokio::io::duplex(64);
        let mut prefix = Vec::new();
        put_segment(&mut prefix, b"stream").unwrap();
        prefix.extend_from_slice(&[0, 0, 0, 0]);

        use tokio::io::AsyncWriteExt;
        client.write_all(&prefix).await.unwrap();

        let mut request = Request::unmarshal(server).await.unwrap();
        assert_eq!(request.name(), b"stream");

        client.write_all(b"late body").await.unwrap();
        drop(client);
        assert_eq!(request.read_body().await.unwrap(), b"late body");
    }
}
