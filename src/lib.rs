pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod reports;

pub use db::DbPool;

use auth::TokenService;
use config::Config;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub tokens: TokenService,
}

impl AppState {
    /// Build the shared state. Fails when the signing secret is missing or too short.
    pub fn new(config: Config, db: DbPool) -> anyhow::Result<Self> {
        let tokens = TokenService::from_config(&config)?;
        Ok(Self { config, db, tokens })
    }
}
