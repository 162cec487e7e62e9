use thiserror::Error;

use crate::crypto::CryptoError;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Session timed out")]
    TimeoutExpired,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn delivery<S: Into<String>>(msg: S) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Generic, non-leaking text suitable for echoing back to a channel.
    ///
    /// Internal detail (queries, ids, key material hints) stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Store(_) => "⚠️ Storage is temporarily unavailable. Please try again.",
            Self::Crypto(_) => "❌ That credential could not be read.",
            Self::Delivery(_) | Self::Discord(_) => {
                "❌ I couldn't reach you in a private channel. Check your privacy settings and try again."
            }
            Self::NotFound => "❌ No matching credential was found.",
            Self::Validation(_) => "❌ That input doesn't look right. Please try again.",
            Self::TimeoutExpired => "⏱️ This operation timed out. Start again when you're ready.",
            _ => "❌ Something went wrong. Please try again.",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
