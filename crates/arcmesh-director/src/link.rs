//! Remote links between director trees in different processes.
//!
//! A process joins a cluster by linking its root to a [`DirectorServer`]
//! with [`connect_upstream`]. On the server side each connection becomes
//! a leaf whose consumer is the connection itself: interest control
//! messages from the peer change that leaf's interest, everything else
//! is injected as if the leaf had sent it (so it never echoes back).
//!
//! Frames on the wire are message batches (see
//! [`encode_batch`](arcmesh_protocol::encode_batch)).

use std::sync::Arc;

use arcmesh_transport::{Connection, Transport};
use bytes::Bytes;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::director::LinkRole;
use crate::{Director, DirectorError};

/// Links `root` to a remote director server over `connection`.
///
/// The root's current interest is announced immediately; later changes
/// follow as they happen. The returned task runs until the connection
/// closes or the root is detached.
///
/// # Errors
/// [`DirectorError::NotRoot`] if `root` has a parent,
/// [`DirectorError::Detached`] if it left its tree.
pub fn connect_upstream<C: Connection>(
    root: &Director,
    connection: C,
) -> Result<JoinHandle<()>, DirectorError> {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let notify = root.attach_link(LinkRole::Upstream, in_rx, out_tx)?;
    tracing::info!(root = %root.id(), conn = %connection.id(), "linked upstream");
    Ok(tokio::spawn(run_link(connection, in_tx, out_rx, notify)))
}

/// Accepts remote directors and attaches each as a leaf of `parent`.
pub struct DirectorServer {
    parent: Director,
}

impl DirectorServer {
    pub fn new(parent: Director) -> Self {
        Self { parent }
    }

    pub fn director(&self) -> &Director {
        &self.parent
    }

    /// Accept loop. Runs until the transport shuts down.
    ///
    /// # Errors
    /// [`DirectorError::Transport`] when accepting fails for good.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), DirectorError> {
        tracing::info!(parent = %self.parent.id(), "director server accepting peers");
        loop {
            let connection = transport
                .accept()
                .await
                .map_err(|e| DirectorError::Transport(e.to_string()))?;
            let parent = self.parent.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_peer(&parent, connection).await {
                    tracing::warn!(error = %e, "peer link failed");
                }
            });
        }
    }
}

/// Serves one remote director until its connection closes, then removes
/// its leaf and releases everything it subscribed to.
///
/// # Errors
/// [`DirectorError::LeafHasNoChildren`] or [`DirectorError::Detached`]
/// if `parent` can't take a new leaf.
pub async fn serve_peer<C: Connection>(
    parent: &Director,
    connection: C,
) -> Result<(), DirectorError> {
    let leaf = parent.add_leaf()?;
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let notify = leaf.attach_link(LinkRole::Peer, in_rx, out_tx)?;
    let conn_id = connection.id();
    tracing::info!(leaf = %leaf.id(), conn = %conn_id, "peer director attached");

    run_link(connection, in_tx, out_rx, notify).await;

    leaf.detach();
    tracing::info!(leaf = %leaf.id(), conn = %conn_id, "peer director detached");
    Ok(())
}

/// Shuttles frames between a connection and a director's link queues.
async fn run_link<C: Connection>(
    connection: C,
    inbound: mpsc::UnboundedSender<Bytes>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    notify: Arc<Notify>,
) {
    let id = connection.id();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // The director side went away.
                    break;
                };
                if let Err(e) = connection.send(&frame).await {
                    tracing::debug!(conn = %id, error = %e, "link send failed");
                    break;
                }
            }
            frame = connection.recv() => match frame {
                Ok(Some(frame)) => {
                    if inbound.send(Bytes::from(frame)).is_err() {
                        break;
                    }
                    notify.notify_one();
                }
                Ok(None) => {
                    tracing::debug!(conn = %id, "link closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::debug!(conn = %id, error = %e, "link receive failed");
                    break;
                }
            },
        }
    }
    let _ = connection.close().await;
}
