//! Owner of all in-flight dialogues.
//!
//! The live-session table is a sharded map keyed by (owner, channel); each
//! session carries its own async mutex so a turn runs single-writer while
//! turns for other sessions interleave freely. Expiry is enforced both on
//! the next input and by a background sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::crypto::PayloadCipher;
use crate::db::{Credential, CredentialRepo, DbPool, NewCredential};
use crate::engine::session::{
    is_skip, parse_confirmation, parse_selection, Candidate, Confirmation, Session, SessionKind,
    SessionState,
};
use crate::engine::{Effect, InboundEvent, SessionKey};
use crate::error::{AppError, AppResult};
use crate::transport::Messenger;

fn lapse_text(kind: SessionKind) -> String {
    format!(
        "⏱️ Your {} operation timed out. Start again when you're ready.",
        kind.verb()
    )
}

pub struct SessionManager {
    pool: DbPool,
    cipher: PayloadCipher,
    messenger: Arc<Messenger>,
    sessions: DashMap<SessionKey, Arc<Mutex<Session>>>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        pool: DbPool,
        cipher: PayloadCipher,
        messenger: Arc<Messenger>,
        session_timeout_secs: u64,
    ) -> Self {
        Self {
            pool,
            cipher,
            messenger,
            sessions: DashMap::new(),
            timeout: Duration::seconds(session_timeout_secs as i64),
        }
    }

    pub fn has_session(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Start a dialogue for `kind`. An inline argument pre-fills the first
    /// step: the service name for Create, the query for the others (which
    /// may complete the whole operation in one turn).
    ///
    /// A second session for the same (owner, channel) is rejected; the
    /// existing one is never silently overwritten.
    pub async fn begin(
        &self,
        kind: SessionKind,
        event: &InboundEvent,
        inline: Option<String>,
    ) -> Vec<Effect> {
        let key = SessionKey::of(event);
        if self.sessions.contains_key(&key) {
            return vec![Effect::Reply {
                channel: event.channel.clone(),
                text: "⚠️ You already have an operation in progress here. Finish it or type `cancel` first."
                    .to_string(),
            }];
        }

        let mut session = Session::new(
            kind,
            &event.owner,
            &event.channel,
            event.is_private,
            self.timeout,
        );

        let effects = match (kind, inline) {
            (SessionKind::Create, Some(name)) => {
                session.service_name = Some(name);
                session.state = SessionState::AwaitingUsername;
                vec![session.reply(session.prompt())]
            }
            (_, Some(query)) => self.run_turn(&mut session, &query).await,
            (_, None) => vec![session.reply(session.prompt())],
        };

        if !session.closed {
            debug!("session opened: {} for owner {}", kind.verb(), event.owner);
            self.sessions.insert(key, Arc::new(Mutex::new(session)));
        }
        effects
    }

    /// Feed one input event to the owning session. Returns `None` when no
    /// live session exists for the event's (owner, channel), in which case
    /// the router falls back to command parsing.
    pub async fn advance(&self, event: &InboundEvent) -> Option<Vec<Effect>> {
        let key = SessionKey::of(event);
        let entry = self.sessions.get(&key).map(|e| Arc::clone(e.value()))?;

        let mut session = entry.lock().await;
        if session.closed {
            return None;
        }

        if session.ensure_active(Utc::now()).is_err() {
            session.closed = true;
            let kind = session.kind;
            drop(session);
            self.sessions.remove(&key);
            info!("session for owner {} lapsed on input", key.owner);
            return Some(vec![Effect::Private {
                owner: key.owner.clone(),
                text: lapse_text(kind),
            }]);
        }

        let effects = self.run_turn(&mut session, &event.content).await;
        let done = session.closed;
        drop(session);
        if done {
            self.sessions.remove(&key);
        }
        Some(effects)
    }

    /// Cooperative cancellation: drop the session with no store side effects.
    pub async fn cancel(&self, key: &SessionKey) -> Option<Vec<Effect>> {
        let entry = self.sessions.get(key).map(|e| Arc::clone(e.value()))?;

        let mut session = entry.lock().await;
        if session.closed {
            return None;
        }
        session.closed = true;
        let channel = session.origin_channel.clone();
        drop(session);
        self.sessions.remove(key);

        info!("session for owner {} cancelled", key.owner);
        Some(vec![Effect::Reply {
            channel,
            text: "❌ Operation cancelled. Nothing was changed.".to_string(),
        }])
    }

    /// Force-expire every session whose deadline has passed, notifying each
    /// owner exactly once. Sessions currently mid-turn are skipped; their
    /// own turn re-checks expiry.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut lapsed = Vec::new();

        for entry in self.sessions.iter() {
            if let Ok(mut session) = entry.value().try_lock() {
                if !session.closed && session.ensure_active(now).is_err() {
                    session.closed = true;
                    lapsed.push((entry.key().clone(), session.kind));
                }
            }
        }

        for (key, kind) in lapsed {
            self.sessions.remove(&key);
            info!("session for owner {} force-expired by sweep", key.owner);
            self.messenger
                .execute(vec![Effect::Private {
                    owner: key.owner.clone(),
                    text: lapse_text(kind),
                }])
                .await;
        }
    }

    /// Background sweep loop; aborts with the returned handle.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        })
    }

    /// Metadata inventory for the one-shot `list` command.
    pub async fn inventory(&self, owner: &str) -> AppResult<Vec<Credential>> {
        CredentialRepo::list_all(&self.pool, owner).await
    }

    /// Process one validated-or-reprompted step. Terminal store writes and
    /// private disclosure happen in here, awaited, so a failure leaves the
    /// state machine where it was and the same step can be retried.
    async fn run_turn(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        let input = input.trim();
        if input.is_empty() {
            session.touch(self.timeout);
            return vec![session.reply(session.prompt())];
        }

        match (session.kind, session.state.clone()) {
            (SessionKind::Create, SessionState::AwaitingServiceName) => {
                self.step_service_name(session, input)
            }
            (SessionKind::Create, SessionState::AwaitingUsername) => {
                self.step_username(session, input).await
            }
            (SessionKind::Create, SessionState::AwaitingSecret) => {
                self.step_store_secret(session, input).await
            }
            (_, SessionState::AwaitingServiceQuery) => self.step_query(session, input).await,
            (_, SessionState::Disambiguating { candidates }) => {
                self.step_selection(session, &candidates, input).await
            }
            (SessionKind::Update, SessionState::AwaitingNewSecret) => {
                self.step_update_secret(session, input).await
            }
            (SessionKind::Delete, SessionState::AwaitingConfirmation) => {
                self.step_confirmation(session, input).await
            }
            (kind, state) => {
                error!(
                    "impossible session step: {} in {:?} for owner {}",
                    kind.verb(),
                    state,
                    session.owner
                );
                session.closed = true;
                vec![session.reply(AppError::internal("bad session state").user_message())]
            }
        }
    }

    fn step_service_name(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        session.service_name = Some(input.to_string());
        session.state = SessionState::AwaitingUsername;
        session.touch(self.timeout);
        vec![session.reply(session.prompt())]
    }

    async fn step_username(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        session.username = if is_skip(input) {
            None
        } else {
            Some(input.to_string())
        };

        let service = session.service_name.clone().unwrap_or_default();
        // Duplicates never block creation; they only annotate the outcome.
        match CredentialRepo::find_exact(&self.pool, &session.owner, &service).await {
            Ok(existing) => session.duplicate_count = existing.len(),
            Err(e) => {
                warn!("duplicate check failed for '{}': {}", service, e);
                session.duplicate_count = 0;
            }
        }

        session.state = SessionState::AwaitingSecret;
        session.touch(self.timeout);

        let mut text = String::new();
        if session.duplicate_count > 0 {
            text.push_str(&format!(
                "ℹ️ You already have {} credential(s) named '{}'; this will be stored alongside them.\n",
                session.duplicate_count, service
            ));
        }
        text.push_str(&session.prompt());
        vec![session.reply(text)]
    }

    async fn step_store_secret(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        let service = session.service_name.clone().unwrap_or_default();
        let secret = Zeroizing::new(input.to_string());

        let payload = match self.cipher.encrypt(&secret) {
            Ok(payload) => payload,
            Err(e) => {
                error!("encryption failed: {}", e);
                session.closed = true;
                return vec![session.reply(AppError::from(e).user_message())];
            }
        };

        let new = NewCredential {
            owner_id: session.owner.clone(),
            service_name: service.clone(),
            username: session.username.clone(),
            encrypted_payload: payload,
        };
        match CredentialRepo::create(&self.pool, new).await {
            Ok(_) => {
                session.closed = true;
                let mut text = format!("✅ Stored a new credential for '{}'.", service);
                if session.duplicate_count > 0 {
                    text.push_str(&format!(
                        " You now have {} entries with that name.",
                        session.duplicate_count + 1
                    ));
                }
                vec![session.private_ephemeral(text)]
            }
            Err(e) => {
                warn!("credential insert failed: {}", e);
                session.touch(self.timeout);
                vec![session.reply(format!(
                    "{} Send the secret again to retry.",
                    e.user_message()
                ))]
            }
        }
    }

    async fn step_query(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        let matches = match CredentialRepo::find(&self.pool, &session.owner, input).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("credential lookup failed: {}", e);
                session.touch(self.timeout);
                return vec![session.reply(e.user_message())];
            }
        };
        session.touch(self.timeout);

        match matches.len() {
            0 => {
                session.closed = true;
                vec![session.reply(format!("❌ No credential found matching '{}'.", input))]
            }
            1 => {
                let candidate = Candidate::from(&matches[0]);
                self.resolve_target(session, candidate).await
            }
            _ => {
                let candidates: Vec<Candidate> = matches.iter().map(Candidate::from).collect();
                session.state = SessionState::Disambiguating { candidates };
                vec![session.reply(session.prompt())]
            }
        }
    }

    async fn step_selection(
        &self,
        session: &mut Session,
        candidates: &[Candidate],
        input: &str,
    ) -> Vec<Effect> {
        session.touch(self.timeout);
        match parse_selection(input, candidates.len()) {
            Some(index) => {
                let candidate = candidates[index].clone();
                self.resolve_target(session, candidate).await
            }
            None => vec![session.reply(format!(
                "Please reply with a number between 1 and {}.",
                candidates.len()
            ))],
        }
    }

    /// A single store row has been chosen; either finish (Retrieve) or move
    /// to the kind's next step.
    async fn resolve_target(&self, session: &mut Session, candidate: Candidate) -> Vec<Effect> {
        match session.kind {
            SessionKind::Retrieve => self.terminal_retrieve(session, candidate).await,
            SessionKind::Update => {
                session.target = Some(candidate);
                session.state = SessionState::AwaitingNewSecret;
                vec![session.reply(session.prompt())]
            }
            SessionKind::Delete => {
                session.target = Some(candidate);
                session.state = SessionState::AwaitingConfirmation;
                vec![session.reply(session.prompt())]
            }
            SessionKind::Create => {
                error!("create session reached target resolution");
                session.closed = true;
                vec![session.reply(AppError::internal("bad session state").user_message())]
            }
        }
    }

    /// Decrypt and disclose privately. The send is awaited: on delivery
    /// failure the session stays where it is and no plaintext goes anywhere
    /// else.
    async fn terminal_retrieve(&self, session: &mut Session, candidate: Candidate) -> Vec<Effect> {
        let cred = match CredentialRepo::get_by_id(&self.pool, &session.owner, candidate.id).await {
            Ok(Some(cred)) => cred,
            Ok(None) => {
                session.closed = true;
                return vec![session.reply("❌ That credential no longer exists.")];
            }
            Err(e) => {
                warn!("credential fetch failed: {}", e);
                return vec![session.reply(e.user_message())];
            }
        };

        let plaintext = match self.cipher.decrypt(&cred.encrypted_payload) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!("undecryptable payload for credential {}: {}", cred.id, e);
                session.closed = true;
                return vec![session.reply(AppError::from(e).user_message())];
            }
        };

        let ttl = self.messenger.secret_ttl().as_secs();
        let mut text = format!("🔑 {}\n", cred.service_name);
        if let Some(username) = &cred.username {
            text.push_str(&format!("Username: {}\n", username));
        }
        text.push_str(&format!("Secret: {}\n", plaintext.as_str()));
        text.push_str(&format!("This message self-deletes in {} seconds.", ttl));

        match self.messenger.send_private_ephemeral(&session.owner, &text).await {
            Ok(()) => {
                session.closed = true;
                if session.origin_private {
                    Vec::new()
                } else {
                    vec![session.reply("📬 Sent privately; the message self-deletes shortly.")]
                }
            }
            Err(e) => {
                warn!("private disclosure to {} failed: {}", session.owner, e);
                vec![session.reply(e.user_message())]
            }
        }
    }

    async fn step_update_secret(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        let Some(target) = session.target.clone() else {
            error!("update step without a target");
            session.closed = true;
            return vec![session.reply(AppError::internal("bad session state").user_message())];
        };

        let secret = Zeroizing::new(input.to_string());
        let payload = match self.cipher.encrypt(&secret) {
            Ok(payload) => payload,
            Err(e) => {
                error!("encryption failed: {}", e);
                session.closed = true;
                return vec![session.reply(AppError::from(e).user_message())];
            }
        };

        match CredentialRepo::update(&self.pool, &session.owner, target.id, &payload, None).await {
            Ok(_) => {
                session.closed = true;
                vec![session.private_ephemeral(format!("✅ Updated '{}'.", target.service_name))]
            }
            Err(AppError::NotFound) => {
                session.closed = true;
                vec![session.reply("❌ That credential no longer exists.")]
            }
            Err(e) => {
                warn!("credential update failed: {}", e);
                session.touch(self.timeout);
                vec![session.reply(format!(
                    "{} Send the secret again to retry.",
                    e.user_message()
                ))]
            }
        }
    }

    async fn step_confirmation(&self, session: &mut Session, input: &str) -> Vec<Effect> {
        session.touch(self.timeout);
        match parse_confirmation(input) {
            None => vec![session.reply("Please reply `yes` to delete or `no` to keep it.")],
            Some(Confirmation::No) => {
                session.closed = true;
                vec![session.reply("Deletion cancelled; nothing was removed.")]
            }
            Some(Confirmation::Yes) => {
                let Some(target) = session.target.clone() else {
                    error!("delete confirmation without a target");
                    session.closed = true;
                    return vec![
                        session.reply(AppError::internal("bad session state").user_message())
                    ];
                };

                match CredentialRepo::delete(&self.pool, &session.owner, target.id).await {
                    Ok(()) => {
                        session.closed = true;
                        vec![session.private(format!("🗑️ Deleted '{}'.", target.service_name))]
                    }
                    Err(AppError::NotFound) => {
                        session.closed = true;
                        vec![session.reply("❌ That credential no longer exists.")]
                    }
                    Err(e) => {
                        warn!("credential delete failed: {}", e);
                        vec![session.reply(format!("{} Reply `yes` to retry.", e.user_message()))]
                    }
                }
            }
        }
    }
}
