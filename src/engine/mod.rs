//! The conversational command engine: sessions, the state machine that
//! drives them, and the router that feeds transport events into it.

pub mod manager;
pub mod router;
pub mod session;

pub use manager::SessionManager;
pub use router::{Command, CommandRouter};
pub use session::{Session, SessionKind, SessionState};

/// One incoming transport event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub owner: String,
    pub channel: String,
    pub content: String,
    /// Whether the origin channel is inherently private (a DM). Secret
    /// disclosure never depends on this; it always goes through a private
    /// channel of its own.
    pub is_private: bool,
}

/// The (owner, channel) pair that scopes a dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub owner: String,
    pub channel: String,
}

impl SessionKey {
    pub fn of(event: &InboundEvent) -> Self {
        Self {
            owner: event.owner.clone(),
            channel: event.channel.clone(),
        }
    }
}

/// A messaging side effect produced by a turn, executed by the caller.
///
/// Keeping prompts and confirmations as values means the state machine can be
/// exercised in tests without a live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Plain reply into the channel the event came from.
    Reply { channel: String, text: String },
    /// Message into the owner's private channel.
    Private { owner: String, text: String },
    /// Private message that is auto-deleted after the secret TTL.
    PrivateEphemeral { owner: String, text: String },
}
