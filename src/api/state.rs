use std::sync::Arc;

use crate::db::Store;
use crate::services::catalog::CatalogProvider;
use crate::services::generator::GeneratorClient;
use crate::services::session::SessionEngine;

/// Shared application state: the pipeline's collaborators behind trait
/// objects, so tests can swap in fakes
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub generator: Arc<dyn GeneratorClient>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub region: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn GeneratorClient>,
        catalog: Arc<dyn CatalogProvider>,
        region: String,
    ) -> Self {
        Self {
            store,
            generator,
            catalog,
            region,
        }
    }

    /// Builds a session engine over this state's collaborators
    pub fn engine(&self) -> SessionEngine {
        SessionEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            Arc::clone(&self.catalog),
            self.region.clone(),
        )
    }
}
