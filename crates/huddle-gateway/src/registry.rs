use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use huddle_types::error::ChatError;
use huddle_types::events::ServerEvent;

pub type SessionId = Uuid;

/// A logical broadcast target. Rooms have no identity of their own beyond
/// this key; their only state is the set of member sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Channel(String),
    /// Per-user inbox, used for direct messages.
    User(String),
    Thread(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel:{}", id),
            Self::User(id) => write!(f, "user:{}", id),
            Self::Thread(id) => write!(f, "thread:{}", id),
        }
    }
}

/// The sending half of one connection, as seen by the registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: Arc<str>,
    tx: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl SessionHandle {
    pub fn new(user_id: &str) -> (Self, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id: Arc::from(user_id),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue an event for this connection. Returns false if the connection
    /// is already gone, in which case the event is dropped.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Capability check consulted on every subscribe.
pub trait RoomAccess: Send + Sync {
    fn may_join(&self, user_id: &str, room: &RoomKey) -> bool;
}

/// Grants every join. Channel ACLs are enforced elsewhere, if at all.
pub struct OpenAccess;

impl RoomAccess for OpenAccess {
    fn may_join(&self, _user_id: &str, _room: &RoomKey) -> bool {
        true
    }
}

/// In-memory index of which sessions are in which rooms.
///
/// Membership changes and fanout reads take the same lock, so an event is
/// never delivered to a session that is halfway through teardown, and a
/// session that finished joining never misses one.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    access: Arc<dyn RoomAccess>,
    state: RwLock<Membership>,
}

#[derive(Default)]
struct Membership {
    /// room -> (session id -> handle)
    rooms: HashMap<RoomKey, HashMap<SessionId, SessionHandle>>,
    /// session id -> rooms it holds (reverse index for disconnect cleanup)
    joined: HashMap<SessionId, HashSet<RoomKey>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::with_access(Arc::new(OpenAccess))
    }

    pub fn with_access(access: Arc<dyn RoomAccess>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                access,
                state: RwLock::new(Membership::default()),
            }),
        }
    }

    /// Add a session to a room. Returns whether it was newly added; joining
    /// a room twice is a no-op.
    pub fn subscribe(&self, session: &SessionHandle, room: RoomKey) -> Result<bool, ChatError> {
        if !self.inner.access.may_join(session.user_id(), &room) {
            return Err(ChatError::Unauthorized);
        }

        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .joined
            .entry(session.id())
            .or_default()
            .insert(room.clone());
        let added = state
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(session.id(), session.clone())
            .is_none();

        if added {
            debug!("session {} joined {}", session.id(), room);
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, session_id: SessionId, room: &RoomKey) -> bool {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(rooms) = state.joined.get_mut(&session_id) {
            rooms.remove(room);
        }
        remove_member(&mut state.rooms, room, session_id)
    }

    /// Drop a session from every room it held. Returns how many rooms that was.
    pub fn remove_all_memberships(&self, session_id: SessionId) -> usize {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(rooms) = state.joined.remove(&session_id) else {
            return 0;
        };
        for room in &rooms {
            remove_member(&mut state.rooms, room, session_id);
        }
        rooms.len()
    }

    pub fn members_of(&self, room: &RoomKey) -> Vec<SessionHandle> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, session_id: SessionId) -> Vec<RoomKey> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .joined
            .get(&session_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        state.rooms.len()
    }

    /// Queue `event` once for every session in the union of `rooms`.
    /// A session in several of the rooms still gets it once. Returns the
    /// number of sessions the event was queued for.
    pub fn deliver(&self, rooms: &[RoomKey], event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut seen: HashSet<SessionId> = HashSet::new();
        let mut delivered = 0;
        for room in rooms {
            let Some(members) = state.rooms.get(room) else {
                continue;
            };
            for (id, handle) in members {
                if seen.insert(*id) && handle.send(event.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

fn remove_member(
    rooms: &mut HashMap<RoomKey, HashMap<SessionId, SessionHandle>>,
    room: &RoomKey,
    session_id: SessionId,
) -> bool {
    let Some(members) = rooms.get_mut(room) else {
        return false;
    };
    let removed = members.remove(&session_id).is_some();
    if members.is_empty() {
        rooms.remove(room);
    }
    removed
}
