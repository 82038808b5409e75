// Re-export modules for the binary and for integration tests
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod stomp;

// Re-export main types for convenience
pub use api::{ApiClient, HistoryLoader};
pub use chat::ChatClient;
pub use config::ClientConfig;
pub use models::*;
pub use reconcile::{Publisher, Reconciled, Reconciler};
pub use stomp::SessionHandle;
