pub mod api;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod providers;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::AppError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn store::MessageStore>,
    pub provider: Arc<dyn providers::OAuthProvider>,
    pub runner: Arc<scheduler::DeliveryRunner>,
    pub signer: crypto::StateSigner,
    pub clock: Arc<dyn scheduler::Clock>,
}

pub type SharedState = Arc<AppState>;
