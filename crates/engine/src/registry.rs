//! Bookkeeping for in-flight action invocations.
//!
//! Every invocation gets a fresh [`InvocationId`] and its own
//! [`CancellationToken`]. Streaming invocations also register a socket close
//! handle. Entries are removed exactly once: by [`InvocationRegistry::cancel`],
//! [`InvocationRegistry::cancel_all`] or when the [`InvocationGuard`] drops.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tessera_api::SocketFrame;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type InvocationId = u64;

#[derive(Debug)]
struct Entry {
    token: CancellationToken,
    socket: Option<UnboundedSender<SocketFrame>>,
}

#[derive(Debug, Default)]
pub struct InvocationRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<InvocationId, Entry>>,
}

impl InvocationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new invocation and returns the guard that owns it.
    pub fn allocate(self: &Arc<Self>) -> InvocationGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        self.entries.lock().insert(
            id,
            Entry {
                token: token.clone(),
                socket: None,
            },
        );
        InvocationGuard {
            id,
            token,
            registry: Arc::clone(self),
        }
    }

    /// Associates a socket close handle with a live invocation.
    pub fn attach_socket(&self, id: InvocationId, closer: UnboundedSender<SocketFrame>) -> bool {
        match self.entries.lock().get_mut(&id) {
            Some(entry) => {
                entry.socket = Some(closer);
                true
            }
            None => false,
        }
    }

    /// Cancels the token, closes any socket and forgets the invocation.
    pub fn cancel(&self, id: InvocationId) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        Self::shutdown(id, entry);
        true
    }

    /// Cancels every open invocation; returns how many were open.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            Self::shutdown(id, entry);
        }
        count
    }

    /// Forgets a finished invocation without cancelling it.
    pub fn release(&self, id: InvocationId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    pub fn is_active(&self, id: InvocationId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn active(&self) -> usize {
        self.entries.lock().len()
    }

    fn shutdown(id: InvocationId, entry: Entry) {
        debug!(invocation_id = id, has_socket = entry.socket.is_some(), "cancelling invocation");
        entry.token.cancel();
        if let Some(socket) = entry.socket {
            let _ = socket.send(SocketFrame::Close);
        }
    }
}

/// Owns one registry entry; dropping it releases the entry.
#[derive(Debug)]
pub struct InvocationGuard {
    id: InvocationId,
    token: CancellationToken,
    registry: Arc<InvocationRegistry>,
}

impl InvocationGuard {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn attach_socket(&self, closer: UnboundedSender<SocketFrame>) -> bool {
        self.registry.attach_socket(self.id, closer)
    }
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
