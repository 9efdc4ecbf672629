use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::handler::action::Executor;
use crate::intercept::access::AccessInterceptor;
use crate::intercept::response::{ChaosService, ResponseInterceptor};
use crate::intercept::route::{RouteResolver, RouteTable};
use crate::store::RuleStore;

pub mod config;
pub mod handler;
pub mod host;
pub mod intercept;
pub mod raw_config;
pub mod store;

/// Wires a rule store to both interceptors.
#[derive(Debug, Clone)]
pub struct Engine {
    pub store: Arc<RuleStore>,
    pub response: Arc<ResponseInterceptor>,
    pub access: Arc<AccessInterceptor>,
    routes: Arc<RouteTable>,
}

impl Engine {
    pub fn new(store: Arc<RuleStore>, routes: RouteTable, executor: Executor) -> Self {
        Self {
            response: Arc::new(ResponseInterceptor::new(store.clone(), executor.clone())),
            access: Arc::new(AccessInterceptor::new(store.clone(), executor)),
            routes: Arc::new(routes),
            store,
        }
    }

    /// Creates an engine with an in-memory store seeded with the configured rules.
    pub fn from_config(config: Config, executor: Executor) -> anyhow::Result<Self> {
        let store = RuleStore::from_config(&config)?;
        info!("chaos engine ready with {} rules", store.len());
        Ok(Self::new(Arc::new(store), config.routes, executor))
    }

    /// Loads an engine over a persisted store. Configured rules are not seeded.
    pub fn load(config: Config, path: &Path, executor: Executor) -> anyhow::Result<Self> {
        let store = RuleStore::load(path, config.host, config.ignore)?;
        info!("loaded {} chaos rules from {}", store.len(), path.display());
        Ok(Self::new(Arc::new(store), config.routes, executor))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn service<S>(&self, inner: S) -> ChaosService<S> {
        let routes: Arc<dyn RouteResolver> = self.routes.clone();
        ChaosService::new(self.response.clone(), routes, inner)
    }
}
