pub mod bot;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod error;
pub mod transport;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
