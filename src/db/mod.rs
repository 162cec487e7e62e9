pub mod models;
pub mod queries;

pub use models::{Credential, NewCredential};
pub use queries::{init_db, CredentialRepo, DbPool};

#[cfg(test)]
pub use queries::setup_test_db;
