//! Shared state handed to every packet handler.

use crate::auth::AccountStore;
use crate::config::ServerConfig;
use crate::security::BanStore;
use crate::session::ConnectionManager;
use crate::utils::metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;

/// Everything a handler may consult or change besides its own connection.
///
/// Built once at startup and owned by the server hub; handlers receive it by
/// mutable reference, so there is exactly one writer at any time.
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub accounts: Box<dyn AccountStore>,
    pub bans: BanStore,
    pub manager: ConnectionManager,
    pub metrics: Arc<Metrics>,
    /// Time of the event being processed.
    pub now: Instant,
}

impl ServerContext {
    pub fn new(
        config: Arc<ServerConfig>,
        accounts: Box<dyn AccountStore>,
        bans: BanStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        let manager = ConnectionManager::new(
            config.network.max_connections,
            config.network.max_per_address,
        );
        Self {
            config,
            accounts,
            bans,
            manager,
            metrics,
            now: Instant::now(),
        }
    }
}
