use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use huddle_types::events::ServerEvent;

use crate::registry::{RoomRegistry, SessionHandle, SessionId};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake frame.
    Connecting,
    /// Handshake accepted; only `join_channels` is allowed.
    Authenticated,
    /// Joined its default rooms; all events are accepted.
    Active,
    /// Transport gone; memberships released.
    Closed,
}

/// Server-side state of one authenticated connection.
///
/// Owns the connection's cancellation scope and its room memberships.
/// Closing (or dropping) the session cancels the scope and removes the
/// session from every room, so nothing about it survives a disconnect.
pub struct Session {
    handle: SessionHandle,
    state: ConnectionState,
    registry: RoomRegistry,
    scope: CancellationToken,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle, registry: RoomRegistry, scope: CancellationToken) -> Self {
        Self {
            handle,
            state: ConnectionState::Authenticated,
            registry,
            scope,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> &str {
        self.handle.user_id()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Cancelled when the session closes or the server shuts down.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Leave every room and cancel the scope. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let from = self.state;
        self.state = ConnectionState::Closed;
        self.scope.cancel();
        let rooms = self.registry.remove_all_memberships(self.handle.id());
        debug!(
            "session {} ({}) closed from {:?}, left {} rooms",
            self.handle.id(),
            self.handle.user_id(),
            from,
            rooms
        );
    }

    /// Send an event to this session only.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.handle.send(Arc::new(event))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
