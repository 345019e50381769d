use tracing::debug;

use huddle_types::events::ServerEvent;
use huddle_types::models::{Addressing, MessageWithUser, Reaction};

use crate::registry::{RoomKey, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Removed,
}

/// Rooms a new message goes to.
///
/// A reply goes to its thread room only, never to the parent channel's
/// stream. A direct message goes to both inboxes so the sender's other
/// sessions see it too; for an answer written on someone's behalf, the
/// sender side is that user.
pub fn message_targets(msg: &Addressing) -> Vec<RoomKey> {
    if let Some(thread_id) = &msg.thread_id {
        return vec![RoomKey::Thread(thread_id.clone())];
    }
    if let Some(channel_id) = &msg.channel_id {
        return vec![RoomKey::Channel(channel_id.clone())];
    }
    if let Some(to_user_id) = &msg.to_user_id {
        return vec![
            RoomKey::User(msg.speaker().to_string()),
            RoomKey::User(to_user_id.clone()),
        ];
    }
    vec![]
}

/// Rooms a reaction change goes to, given the message it is on.
pub fn reaction_targets(parent: &Addressing, reacting_user_id: &str) -> Vec<RoomKey> {
    if let Some(channel_id) = &parent.channel_id {
        return vec![RoomKey::Channel(channel_id.clone())];
    }
    if let Some(to_user_id) = &parent.to_user_id {
        return vec![
            RoomKey::User(to_user_id.clone()),
            RoomKey::User(reacting_user_id.to_string()),
        ];
    }
    if let Some(thread_id) = &parent.thread_id {
        return vec![RoomKey::Thread(thread_id.clone())];
    }
    vec![]
}

/// Routes persisted events to the sessions that should see them.
/// Fire-and-forget: nothing waits for clients to acknowledge.
#[derive(Clone)]
pub struct Dispatcher {
    registry: RoomRegistry,
}

impl Dispatcher {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Returns how many sessions the message was queued for.
    pub fn dispatch_message(&self, msg: MessageWithUser) -> usize {
        let targets = message_targets(&msg.addressing());
        let event = if msg.thread_id.is_some() {
            ServerEvent::ThreadMessage(msg)
        } else {
            ServerEvent::Message(msg)
        };
        self.fanout(&targets, event)
    }

    pub fn dispatch_reaction(
        &self,
        change: ReactionChange,
        reaction: Reaction,
        parent: &Addressing,
    ) -> usize {
        let targets = reaction_targets(parent, &reaction.user_id);
        let event = match change {
            ReactionChange::Added => ServerEvent::ReactionAdd(reaction),
            ReactionChange::Removed => ServerEvent::ReactionRemove(reaction),
        };
        self.fanout(&targets, event)
    }

    fn fanout(&self, targets: &[RoomKey], event: ServerEvent) -> usize {
        let name = event.name();
        let delivered = self.registry.deliver(targets, event);
        debug!(
            "{} -> [{}] delivered to {} sessions",
            name,
            targets.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "),
            delivered
        );
        delivered
    }
}
