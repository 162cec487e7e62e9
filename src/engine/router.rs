//! Top-level command dispatch.
//!
//! The one rule that must hold exactly: while a session is active for an
//! (owner, channel), every event from there is session input — even text
//! that looks like a new command — until the session completes, lapses or
//! is cancelled.

use std::sync::Arc;

use tracing::warn;

use crate::engine::manager::SessionManager;
use crate::engine::session::SessionKind;
use crate::engine::{Effect, InboundEvent, SessionKey};

/// A recognized top-level command. Missing arguments are not an error; the
/// dialogue collects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(Option<String>),
    Get(Option<String>),
    Update(Option<String>),
    Delete(Option<String>),
    List,
    Help,
}

impl Command {
    /// Parse a prefix-marked command. Pure; anything unrecognized is `None`.
    pub fn parse(content: &str, prefix: &str) -> Option<Command> {
        let rest = content.trim().strip_prefix(prefix)?;
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let head = parts.next()?.to_ascii_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        match head.as_str() {
            "new" => Some(Command::New(arg)),
            "get" => Some(Command::Get(arg)),
            "update" => Some(Command::Update(arg)),
            "delete" => Some(Command::Delete(arg)),
            "list" => Some(Command::List),
            "help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// The cancel token, recognized only while a session is active.
pub fn is_cancel(content: &str, prefix: &str) -> bool {
    let trimmed = content.trim();
    trimmed.eq_ignore_ascii_case("cancel")
        || trimmed
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.trim().eq_ignore_ascii_case("cancel"))
}

pub struct CommandRouter {
    manager: Arc<SessionManager>,
    prefix: String,
}

impl CommandRouter {
    pub fn new(manager: Arc<SessionManager>, prefix: String) -> Self {
        Self { manager, prefix }
    }

    /// Route one transport event to the owning session or to a top-level
    /// command, returning the messaging effects to execute.
    pub async fn dispatch(&self, event: &InboundEvent) -> Vec<Effect> {
        let key = SessionKey::of(event);
        if self.manager.has_session(&key) {
            if is_cancel(&event.content, &self.prefix) {
                if let Some(effects) = self.manager.cancel(&key).await {
                    return effects;
                }
            } else if let Some(effects) = self.manager.advance(event).await {
                return effects;
            }
            // The session closed between the check and the dispatch; treat
            // the event as a fresh top-level command.
        }

        match Command::parse(&event.content, &self.prefix) {
            Some(Command::New(arg)) => self.manager.begin(SessionKind::Create, event, arg).await,
            Some(Command::Get(arg)) => self.manager.begin(SessionKind::Retrieve, event, arg).await,
            Some(Command::Update(arg)) => self.manager.begin(SessionKind::Update, event, arg).await,
            Some(Command::Delete(arg)) => self.manager.begin(SessionKind::Delete, event, arg).await,
            Some(Command::List) => self.handle_list(event).await,
            Some(Command::Help) => vec![Effect::Reply {
                channel: event.channel.clone(),
                text: self.help_text(),
            }],
            None => Vec::new(),
        }
    }

    /// One-shot inventory: metadata only, delivered privately.
    async fn handle_list(&self, event: &InboundEvent) -> Vec<Effect> {
        match self.manager.inventory(&event.owner).await {
            Err(e) => {
                warn!("inventory lookup failed: {}", e);
                vec![Effect::Reply {
                    channel: event.channel.clone(),
                    text: e.user_message().to_string(),
                }]
            }
            Ok(list) if list.is_empty() => vec![Effect::Reply {
                channel: event.channel.clone(),
                text: format!(
                    "📋 No credentials stored yet. Use `{}new` to add one.",
                    self.prefix
                ),
            }],
            Ok(list) => {
                let mut lines = vec![format!("📋 You have {} credential(s) stored:", list.len())];
                for cred in &list {
                    lines.push(format!(
                        "• {} — username: {}, updated {}",
                        cred.service_name,
                        cred.username.as_deref().unwrap_or("—"),
                        cred.updated_at.format("%Y-%m-%d")
                    ));
                }
                vec![Effect::Private {
                    owner: event.owner.clone(),
                    text: lines.join("\n"),
                }]
            }
        }
    }

    fn help_text(&self) -> String {
        let p = &self.prefix;
        format!(
            "🔐 **VaultKeeper commands**\n\
             `{p}new [service]` — store a new credential\n\
             `{p}get <service>` — retrieve one (sent privately, self-deletes)\n\
             `{p}update <service>` — replace a stored secret\n\
             `{p}delete <service>` — remove one (asks for confirmation)\n\
             `{p}list` — list your stored services\n\
             `{p}help` — this message\n\
             Type `cancel` during a dialogue to abort it.\n\
             Secrets are encrypted at rest and only ever sent to you privately; \
             dialogues time out after a short period of inactivity."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PayloadCipher;
    use crate::db::queries::setup_test_db;
    use crate::transport::mock::MockTransport;
    use crate::transport::Messenger;
    use std::time::Duration;

    async fn setup() -> (CommandRouter, Arc<MockTransport>) {
        let pool = setup_test_db().await;
        let cipher = PayloadCipher::from_base64(&PayloadCipher::generate_key()).unwrap();
        let transport = MockTransport::new();
        let messenger = Arc::new(Messenger::new(transport.clone(), Duration::from_secs(60)));
        let manager = Arc::new(SessionManager::new(pool, cipher, messenger, 120));
        (CommandRouter::new(manager, "!".to_string()), transport)
    }

    fn evt(owner: &str, channel: &str, content: &str) -> InboundEvent {
        InboundEvent {
            owner: owner.to_string(),
            channel: channel.to_string(),
            content: content.to_string(),
            is_private: false,
        }
    }

    fn reply_text(effects: &[Effect]) -> String {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Reply { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // --- Command parsing ---

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("!new", "!"), Some(Command::New(None)));
        assert_eq!(
            Command::parse("!new Gmail", "!"),
            Some(Command::New(Some("Gmail".to_string())))
        );
        assert_eq!(
            Command::parse("!get gmail work", "!"),
            Some(Command::Get(Some("gmail work".to_string())))
        );
        assert_eq!(
            Command::parse("  !delete Netflix  ", "!"),
            Some(Command::Delete(Some("Netflix".to_string())))
        );
        assert_eq!(Command::parse("!list", "!"), Some(Command::List));
        assert_eq!(Command::parse("!help", "!"), Some(Command::Help));
    }

    #[test]
    fn test_parse_is_case_insensitive_on_the_verb() {
        assert_eq!(
            Command::parse("!GET Gmail", "!"),
            Some(Command::Get(Some("Gmail".to_string())))
        );
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert_eq!(Command::parse("hello there", "!"), None);
        assert_eq!(Command::parse("!unknown", "!"), None);
        assert_eq!(Command::parse("!", "!"), None);
        assert_eq!(Command::parse("new Gmail", "!"), None);
    }

    #[test]
    fn test_parse_honors_configured_prefix() {
        assert_eq!(Command::parse("?list", "?"), Some(Command::List));
        assert_eq!(Command::parse("!list", "?"), None);
    }

    #[test]
    fn test_cancel_token() {
        assert!(is_cancel("cancel", "!"));
        assert!(is_cancel(" CANCEL ", "!"));
        assert!(is_cancel("!cancel", "!"));
        assert!(!is_cancel("cancel it", "!"));
        assert!(!is_cancel("!cancellation", "!"));
    }

    // --- Dispatch ---

    #[tokio::test]
    async fn test_active_session_shadows_commands() {
        let (router, _transport) = setup().await;

        router.dispatch(&evt("u1", "c1", "!new")).await;
        // Looks like a command, but the Create session owns this input: it
        // becomes the service name.
        let effects = router.dispatch(&evt("u1", "c1", "!list")).await;
        assert!(reply_text(&effects).contains("username"));

        router.dispatch(&evt("u1", "c1", "skip")).await;
        router.dispatch(&evt("u1", "c1", "hunter2")).await;

        // Session completed; the stored service name is the literal "!list".
        let list = router.manager.inventory("u1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].service_name, "!list");
    }

    #[tokio::test]
    async fn test_cancel_recognized_only_during_session() {
        let (router, _transport) = setup().await;

        // No session: "cancel" is not a command and produces nothing.
        let effects = router.dispatch(&evt("u1", "c1", "cancel")).await;
        assert!(effects.is_empty());

        router.dispatch(&evt("u1", "c1", "!new Gmail")).await;
        let effects = router.dispatch(&evt("u1", "c1", "cancel")).await;
        assert!(reply_text(&effects).contains("cancelled"));

        let list = router.manager.inventory("u1").await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_list_sends_metadata_privately_without_payloads() {
        let (router, transport) = setup().await;

        router.dispatch(&evt("u1", "c1", "!new Gmail")).await;
        router.dispatch(&evt("u1", "c1", "alice")).await;
        router.dispatch(&evt("u1", "c1", "S3cr3t!")).await;

        let effects = router.dispatch(&evt("u1", "c1", "!list")).await;
        let private: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Private { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(private.len(), 1);
        assert!(private[0].contains("Gmail"));
        assert!(private[0].contains("alice"));
        assert!(!private[0].contains("S3cr3t!"));

        // Nothing secret went through the transport during list either.
        assert!(!transport.channel_texts().iter().any(|t| t.contains("S3cr3t!")));
    }

    #[tokio::test]
    async fn test_list_with_no_rows_points_at_new() {
        let (router, _transport) = setup().await;
        let effects = router.dispatch(&evt("u1", "c1", "!list")).await;
        assert!(reply_text(&effects).contains("!new"));
    }

    #[tokio::test]
    async fn test_help_lists_command_surface() {
        let (router, _transport) = setup().await;
        let effects = router.dispatch(&evt("u1", "c1", "!help")).await;
        let text = reply_text(&effects);
        for name in ["!new", "!get", "!update", "!delete", "!list", "cancel"] {
            assert!(text.contains(name), "help is missing {name}");
        }
    }

    #[tokio::test]
    async fn test_plain_chatter_is_ignored() {
        let (router, _transport) = setup().await;
        let effects = router.dispatch(&evt("u1", "c1", "good morning")).await;
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_get_command_full_flow() {
        let (router, transport) = setup().await;

        router.dispatch(&evt("u1", "c1", "!new Gmail")).await;
        router.dispatch(&evt("u1", "c1", "alice")).await;
        router.dispatch(&evt("u1", "c1", "S3cr3t!")).await;

        router.dispatch(&evt("u1", "c1", "!get gmail")).await;
        let private = transport.private_texts();
        assert!(private.iter().any(|t| t.contains("S3cr3t!")));
    }
}
