//! Stream primitives over one QUIC connection.
//!
//! Every stream opens with a one-byte flag selecting how the acceptor
//! treats the rest of it: `0` carries a node request, `1` is a greet
//! echoed back verbatim.

use super::context::QuicContext;
use crate::error::FabricError;
use crate::node::{Node, NodeModule, NodeRef};
use quinn::{ConnectionError, ReadToEndError, RecvStream, SendStream, VarInt};
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, trace};

/// Flag of a stream carrying a node request.
pub const NODE_STREAM: u8 = 0;

/// Flag of a greet stream.
pub const GREET: u8 = 1;

/// Bytes sent in a greet challenge.
pub const GREET_SIZE: usize = 128;

pub(crate) const CLOSE_NO_ERROR: VarInt = VarInt::from_u32(0);
pub(crate) const CLOSE_REFUSED: VarInt = VarInt::from_u32(1);
pub(crate) const CLOSE_INVALID_NODE: VarInt = VarInt::from_u32(2);

/// Open a stream and write its flag.
///
/// A connection that cannot open streams is reported as
/// [`FabricError::NodeClosed`].
pub(crate) async fn open_stream(
    conn: &quinn::Connection,
    flag: u8,
) -> Result<(SendStream, RecvStream), FabricError> {
    let (mut send, recv) = conn.open_bi().await.map_err(|e| {
        trace!(remote = %conn.remote_address(), error = %e, "Stream open failed");
        FabricError::NodeClosed
    })?;
    send.write_all(&[flag])
        .await
        .map_err(|_| FabricError::NodeClosed)?;
    Ok((send, recv))
}

/// Send random bytes on a greet stream and require them echoed back.
pub(crate) async fn greet(conn: &quinn::Connection) -> Result<(), FabricError> {
    let mut challenge = [0u8; GREET_SIZE];
    rand::rng().fill_bytes(&mut challenge);

    let (mut send, mut recv) = open_stream(conn, GREET).await?;
    send.write_all(&challenge)
        .await
        .map_err(std::io::Error::from)?;
    send.finish()
        .map_err(|e| FabricError::Transport(e.to_string()))?;

    let echoed = recv.read_to_end(GREET_SIZE).await.map_err(|e| match e {
        ReadToEndError::TooLong => FabricError::InvalidNode,
        ReadToEndError::Read(e) => FabricError::Io(e.into()),
    })?;
    if echoed[..] != challenge[..] {
        return Err(FabricError::InvalidNode);
    }
    Ok(())
}

/// Register `conn` as an alive node and serve its streams until it closes.
pub(crate) async fn serve_connection(ctx: Arc<QuicContext>, conn: quinn::Connection) {
    let remote = conn.remote_address();
    let node = match ctx.create_node(conn.clone()) {
        Ok(node) => node,
        Err(e) => {
            debug!(remote = %remote, error = %e, "Connection refused");
            conn.close(CLOSE_REFUSED, b"refused");
            return;
        }
    };
    debug!(remote = %remote, node_id = %node.id(), "Connection established");

    let node_ref: NodeRef = node.clone();
    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let module = ctx.node().clone();
                let node = node_ref.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_stream(&module, node, send, recv).await {
                        debug!(remote = %remote, error = %e, "Stream failed");
                    }
                });
            }
            Err(ConnectionError::ApplicationClosed(_) | ConnectionError::LocallyClosed) => {
                trace!(remote = %remote, "Connection closed");
                break;
            }
            Err(ConnectionError::TimedOut) => {
                debug!(remote = %remote, "Connection idle timeout");
                break;
            }
            Err(e) => {
                debug!(remote = %remote, error = %e, "Connection lost");
                break;
            }
        }
    }
    node.close();
}

/// Dispatch one accepted stream on its flag.
async fn serve_stream(
    module: &NodeModule,
    node: NodeRef,
    mut send: SendStream,
    mut recv: RecvStream,
) -> Result<(), FabricError> {
    let mut flag = [0u8; 1];
    recv.read_exact(&mut flag)
        .await
        .map_err(|e| FabricError::Transport(e.to_string()))?;

    match flag[0] {
        NODE_STREAM => module.serve(recv, send, node).await,
        GREET => {
            tokio::io::copy(&mut recv, &mut send).await?;
            send.finish()
                .map_err(|e| FabricError::Transport(e.to_string()))?;
            Ok(())
        }
        other => Err(FabricError::Transport(format!(
            "unknown stream flag {}",
            other
        ))),
    }
}
