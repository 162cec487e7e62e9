//! One in-flight multi-step dialogue and the pure helpers that interpret
//! step input.

use chrono::{DateTime, Duration, Utc};

use crate::db::Credential;
use crate::engine::Effect;
use crate::error::{AppError, AppResult};

/// Which of the credential operations a dialogue is carrying out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Create,
    Retrieve,
    Update,
    Delete,
}

impl SessionKind {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Retrieve => "retrieval",
            Self::Update => "update",
            Self::Delete => "deletion",
        }
    }

    fn initial_state(&self) -> SessionState {
        match self {
            Self::Create => SessionState::AwaitingServiceName,
            _ => SessionState::AwaitingServiceQuery,
        }
    }
}

/// A store match offered for numeric selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub service_name: String,
    pub username: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for Candidate {
    fn from(cred: &Credential) -> Self {
        Self {
            id: cred.id,
            service_name: cred.service_name.clone(),
            username: cred.username.clone(),
            updated_at: cred.updated_at,
        }
    }
}

/// Current step of a dialogue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingServiceName,
    AwaitingUsername,
    AwaitingSecret,
    AwaitingServiceQuery,
    Disambiguating { candidates: Vec<Candidate> },
    AwaitingNewSecret,
    AwaitingConfirmation,
}

/// One user's active multi-step dialogue, bound to a single operation kind
/// and a single origin channel.
#[derive(Debug)]
pub struct Session {
    pub owner: String,
    pub origin_channel: String,
    pub origin_private: bool,
    pub kind: SessionKind,
    pub state: SessionState,
    pub service_name: Option<String>,
    pub username: Option<String>,
    pub target: Option<Candidate>,
    /// Exact-name duplicates found when a Create reaches the secret step;
    /// annotates the confirmation, never blocks the insert.
    pub duplicate_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set exactly once, when the session completes, cancels or lapses.
    pub(crate) closed: bool,
}

impl Session {
    pub fn new(
        kind: SessionKind,
        owner: &str,
        origin_channel: &str,
        origin_private: bool,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            owner: owner.to_string(),
            origin_channel: origin_channel.to_string(),
            origin_private,
            kind,
            state: kind.initial_state(),
            service_name: None,
            username: None,
            target: None,
            duplicate_count: 0,
            created_at: now,
            last_activity_at: now,
            expires_at: now + timeout,
            closed: false,
        }
    }

    /// Refresh the activity clock, pushing expiry out by the full timeout.
    pub fn touch(&mut self, timeout: Duration) {
        self.last_activity_at = Utc::now();
        self.expires_at = self.last_activity_at + timeout;
    }

    pub fn ensure_active(&self, now: DateTime<Utc>) -> AppResult<()> {
        if now > self.expires_at {
            Err(AppError::TimeoutExpired)
        } else {
            Ok(())
        }
    }

    /// The prompt for the current step, also used to re-prompt on invalid
    /// input.
    pub fn prompt(&self) -> String {
        match &self.state {
            SessionState::AwaitingServiceName => {
                "🔐 Enter the service name (e.g. Gmail, Netflix):".to_string()
            }
            SessionState::AwaitingUsername => format!(
                "Enter the username for {} (or `skip` if there is none):",
                self.service_label()
            ),
            SessionState::AwaitingSecret => {
                format!("Enter the secret value for {}:", self.service_label())
            }
            SessionState::AwaitingServiceQuery => {
                "Which service? Enter its name or part of it:".to_string()
            }
            SessionState::Disambiguating { candidates } => render_candidates(candidates),
            SessionState::AwaitingNewSecret => {
                format!("Enter the new secret for '{}':", self.target_label())
            }
            SessionState::AwaitingConfirmation => format!(
                "🗑️ Delete '{}'? Reply `yes` to confirm or `no` to keep it.",
                self.target_label()
            ),
        }
    }

    fn service_label(&self) -> &str {
        self.service_name.as_deref().unwrap_or("the service")
    }

    fn target_label(&self) -> &str {
        self.target
            .as_ref()
            .map(|t| t.service_name.as_str())
            .unwrap_or("the credential")
    }

    pub(crate) fn reply(&self, text: impl Into<String>) -> Effect {
        Effect::Reply {
            channel: self.origin_channel.clone(),
            text: text.into(),
        }
    }

    pub(crate) fn private(&self, text: impl Into<String>) -> Effect {
        Effect::Private {
            owner: self.owner.clone(),
            text: text.into(),
        }
    }

    pub(crate) fn private_ephemeral(&self, text: impl Into<String>) -> Effect {
        Effect::PrivateEphemeral {
            owner: self.owner.clone(),
            text: text.into(),
        }
    }
}

/// `skip` token for the optional username step.
pub fn is_skip(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("skip")
}

/// Parse a 1-based disambiguation selection into an index, rejecting
/// anything outside `1..=len`.
pub fn parse_selection(input: &str, len: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    if (1..=len).contains(&n) {
        Some(n - 1)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
}

/// Parse a deletion confirmation; anything unrecognized re-prompts.
pub fn parse_confirmation(input: &str) -> Option<Confirmation> {
    match input.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "confirm" => Some(Confirmation::Yes),
        "no" | "n" => Some(Confirmation::No),
        _ => None,
    }
}

/// Enumerated candidate list shown when a query is ambiguous.
pub fn render_candidates(candidates: &[Candidate]) -> String {
    let mut out = format!("Found {} matching credentials:\n", candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        let username = candidate.username.as_deref().unwrap_or("no username");
        out.push_str(&format!(
            "{}. {} ({}) — updated {}\n",
            i + 1,
            candidate.service_name,
            username,
            candidate.updated_at.format("%Y-%m-%d")
        ));
    }
    out.push_str("Reply with the number you mean.");
    out
}
