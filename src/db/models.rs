use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One stored secret.
///
/// `encrypted_payload` only ever holds ciphertext; decryption happens inside
/// the session turn that is about to disclose the value privately.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub id: i64,
    pub owner_id: String,
    /// Free-text label, matched case-insensitively and not unique per owner.
    pub service_name: String,
    pub username: Option<String>,
    pub encrypted_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New credential insert request
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub owner_id: String,
    pub service_name: String,
    pub username: Option<String>,
    pub encrypted_payload: Vec<u8>,
}
