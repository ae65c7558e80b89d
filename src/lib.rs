pub mod auth;
pub mod comments;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod moderation;
pub mod openapi;
pub mod optimistic;
pub mod remote;
pub mod repo;
pub mod routes;
pub mod session;
pub mod votes;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use session::Session;
