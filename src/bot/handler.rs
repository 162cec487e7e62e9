//! Gateway event handler: turns Discord messages into engine events.
//!
//! Message content is never logged here; a message body may be a secret
//! mid-dialogue.

use std::sync::Arc;

use serenity::all::{Context, EventHandler, Message, Ready};
use serenity::async_trait;
use tracing::{debug, info};

use crate::engine::{CommandRouter, InboundEvent};
use crate::transport::Messenger;

pub struct Handler {
    pub router: Arc<CommandRouter>,
    pub messenger: Arc<Messenger>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Connected to Discord as {}", ready.user.name);
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let content = msg.content.trim();
        if content.is_empty() {
            return;
        }

        let event = InboundEvent {
            owner: msg.author.id.to_string(),
            channel: msg.channel_id.to_string(),
            content: content.to_string(),
            is_private: msg.guild_id.is_none(),
        };
        debug!("event from owner {} in channel {}", event.owner, event.channel);

        let effects = self.router.dispatch(&event).await;
        self.messenger.execute(effects).await;
    }
}
