use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_types::error::ChatError;
use huddle_types::events::{ClientEvent, HandshakeAuth, NewMessage, ServerEvent};

use crate::auth::{Authenticator, Identity};
use crate::dispatcher::{Dispatcher, ReactionChange};
use crate::registry::{RoomKey, RoomRegistry, SessionHandle};
use crate::session::{ConnectionState, Session};
use crate::store::MessageStore;

/// The realtime server object.
///
/// Construct exactly once at startup and hand clones to every connection
/// upgrade; clones share one registry, one store and one shutdown scope.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    authenticator: Authenticator,
    store: MessageStore,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(store: MessageStore, authenticator: Authenticator) -> Self {
        Self::with_registry(store, authenticator, RoomRegistry::new())
    }

    pub fn with_registry(
        store: MessageStore,
        authenticator: Authenticator,
        registry: RoomRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                authenticator,
                store,
                dispatcher: Dispatcher::new(registry),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.inner.authenticator
    }

    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn registry(&self) -> &RoomRegistry {
        self.inner.dispatcher.registry()
    }

    /// Cancel every session scope. Connection loops wind down and release
    /// their memberships.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Validate handshake credentials and bind the identity to a profile row.
    pub async fn authenticate(&self, auth: &HandshakeAuth) -> Result<Identity, ChatError> {
        let identity = self.inner.authenticator.authenticate(auth)?;
        self.inner.store.ensure_user(&identity).await?;
        Ok(identity)
    }

    /// Start an authenticated session. The receiver yields everything that
    /// should be written to the client.
    pub fn open_session(
        &self,
        identity: &Identity,
    ) -> (Session, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        let (handle, rx) = SessionHandle::new(&identity.user_id);
        let session = Session::new(
            handle,
            self.registry().clone(),
            self.inner.shutdown.child_token(),
        );
        (session, rx)
    }

    /// Run one inbound event. Failures become an `error` event for this
    /// session only; they never end the connection.
    pub async fn handle_event(&self, session: &mut Session, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.process(session, event).await {
            warn!("{} ({}) {} failed: {:?}", session.user_id(), session.id(), name, e);
            session.send(ServerEvent::Error(e.to_string()));
        }
    }

    async fn process(&self, session: &mut Session, event: ClientEvent) -> Result<(), ChatError> {
        match (session.state(), &event) {
            (_, ClientEvent::Auth(_)) => {
                return Err(ChatError::validation("Already authenticated"));
            }
            (ConnectionState::Authenticated, ClientEvent::JoinChannels) => {}
            (ConnectionState::Authenticated, _) => {
                return Err(ChatError::validation("join_channels required"));
            }
            _ => {}
        }

        match event {
            ClientEvent::Auth(_) => Ok(()),
            ClientEvent::JoinChannels => self.join_channels(session).await,
            ClientEvent::JoinChannel(channel_id) => self.join_channel(session, channel_id).await,
            ClientEvent::ThreadJoin(thread_id) => self.join_thread(session, thread_id).await,
            ClientEvent::Message(payload) => self.send_message(session, payload).await,
            ClientEvent::ReactionAdd(payload) => {
                let (reaction, parent) = self
                    .inner
                    .store
                    .persist_reaction(&payload.message_id, session.user_id(), &payload.emoji)
                    .await?;
                self.inner
                    .dispatcher
                    .dispatch_reaction(ReactionChange::Added, reaction, &parent);
                Ok(())
            }
            ClientEvent::ReactionRemove(payload) => {
                if payload.user_id.as_deref().is_some_and(|id| id != session.user_id()) {
                    return Err(ChatError::Unauthorized);
                }
                let (reaction, parent) = self
                    .inner
                    .store
                    .remove_reaction(&payload.message_id, session.user_id(), &payload.emoji)
                    .await?;
                self.inner
                    .dispatcher
                    .dispatch_reaction(ReactionChange::Removed, reaction, &parent);
                Ok(())
            }
        }
    }

    /// Join one room per existing channel plus the session's own inbox.
    async fn join_channels(&self, session: &mut Session) -> Result<(), ChatError> {
        let channels = self.inner.store.list_channels().await?;
        let registry = self.registry();

        for channel in channels {
            if let Err(e) = registry.subscribe(session.handle(), RoomKey::Channel(channel.id.clone())) {
                debug!("{} skipped channel {}: {}", session.user_id(), channel.id, e);
            }
        }
        registry.subscribe(session.handle(), RoomKey::User(session.user_id().to_string()))?;

        session.set_state(ConnectionState::Active);
        info!(
            "{} ({}) joined {} rooms",
            session.user_id(),
            session.id(),
            registry.rooms_of(session.id()).len()
        );
        Ok(())
    }

    async fn join_channel(&self, session: &mut Session, channel_id: String) -> Result<(), ChatError> {
        if !self.inner.store.channel_exists(&channel_id).await? {
            return Err(ChatError::NotFound("Channel"));
        }
        self.registry().subscribe(session.handle(), RoomKey::Channel(channel_id))?;
        Ok(())
    }

    /// Thread rooms need no existence check. When the id names a message,
    /// the thread is upserted and sent back to this session.
    async fn join_thread(&self, session: &mut Session, thread_id: String) -> Result<(), ChatError> {
        self.registry()
            .subscribe(session.handle(), RoomKey::Thread(thread_id.clone()))?;

        match self
            .inner
            .store
            .get_or_create_thread(&thread_id, session.user_id())
            .await
        {
            Ok(thread) => {
                session.send(ServerEvent::ThreadJoined(thread));
                Ok(())
            }
            Err(ChatError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn send_message(&self, session: &mut Session, payload: NewMessage) -> Result<(), ChatError> {
        if payload.user_id.as_deref().is_some_and(|id| id != session.user_id()) {
            return Err(ChatError::Unauthorized);
        }
        // Nothing is announced unless the write succeeded
        let message = self
            .inner
            .store
            .persist_message(session.user_id(), payload)
            .await?;
        self.inner.dispatcher.dispatch_message(message);
        Ok(())
    }
}
