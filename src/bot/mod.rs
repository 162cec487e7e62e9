pub mod handler;

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, ClientBuilder, GatewayIntents, MessageId, UserId};
use serenity::http::Http;
use tracing::info;

use crate::engine::CommandRouter;
use crate::error::{AppError, AppResult};
use crate::transport::{MessageHandle, Messenger, Transport};

/// Discord-backed implementation of the outbound transport.
pub struct DiscordTransport {
    http: Arc<Http>,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn parse_id(raw: &str) -> AppResult<u64> {
    match raw.parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(AppError::delivery(format!("malformed id '{raw}'"))),
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send_message(&self, channel: &str, text: &str) -> AppResult<()> {
        ChannelId::new(parse_id(channel)?)
            .say(&self.http, text)
            .await?;
        Ok(())
    }

    async fn send_private(&self, owner: &str, text: &str) -> AppResult<MessageHandle> {
        let user = UserId::new(parse_id(owner)?);
        let dm = user.create_dm_channel(&self.http).await?;
        let message = dm.id.say(&self.http, text).await?;
        Ok(MessageHandle {
            channel: dm.id.to_string(),
            message: message.id.to_string(),
        })
    }

    async fn delete_message(&self, handle: &MessageHandle) -> AppResult<()> {
        ChannelId::new(parse_id(&handle.channel)?)
            .delete_message(&self.http, MessageId::new(parse_id(&handle.message)?))
            .await?;
        Ok(())
    }
}

/// Start the gateway client; blocks until the connection ends.
pub async fn start_bot(
    http: Arc<Http>,
    router: Arc<CommandRouter>,
    messenger: Arc<Messenger>,
) -> AppResult<()> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = ClientBuilder::new_with_http(Http::new(http.token()), intents)
        .event_handler(handler::Handler { router, messenger })
        .await?;

    info!("Starting Discord gateway client");
    client.start().await?;
    Ok(())
}
