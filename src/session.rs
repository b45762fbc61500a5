//! Storage collaborators shared by one pipeline call.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::data::domain::{EpisodeSource, FeatureSchema};
use crate::data::repo_memory::InMemoryEpisodeSource;
use crate::data::repo_sqlite::SqliteEpisodeSource;
use crate::training::domain::ModelVersionRepository;
use crate::training::registry_memory::InMemoryVersionRegistry;
use crate::training::registry_sqlite::SqliteVersionRegistry;

/// Episode source plus version registry.
#[derive(Clone)]
pub struct Session {
    pub episodes: Arc<dyn EpisodeSource>,
    pub registry: Arc<dyn ModelVersionRepository>,
}

impl Session {
    pub fn new(episodes: Arc<dyn EpisodeSource>, registry: Arc<dyn ModelVersionRepository>) -> Self {
        Self { episodes, registry }
    }

    /// Both collaborators backed by the same SQLite pool.
    pub fn sqlite(pool: SqlitePool, schema: Arc<FeatureSchema>) -> Self {
        Self {
            episodes: Arc::new(SqliteEpisodeSource::new(pool.clone(), schema)),
            registry: Arc::new(SqliteVersionRegistry::new(pool)),
        }
    }

    /// In-memory session; the concrete episode source is returned so callers
    /// can seed it.
    pub fn in_memory() -> (Self, Arc<InMemoryEpisodeSource>) {
        let source = Arc::new(InMemoryEpisodeSource::new());
        let session = Self {
            episodes: source.clone(),
            registry: Arc::new(InMemoryVersionRegistry::new()),
        };
        (session, source)
    }
}
