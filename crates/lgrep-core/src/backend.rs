//! Process-wide handle on the model services
//!
//! Loading an embedding model is expensive, so the binary builds one
//! [`Backend`] at start-up and hands `Arc` clones to the indexer and the
//! searcher. The models are released when the last clone is dropped.

use std::sync::Arc;

use crate::{
    Config, Result,
    embed::{Embedder, FastEmbedder},
    generate::{Generator, OllamaGenerator},
};

pub struct Backend {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

impl Backend {
    /// Wrap already constructed services.
    pub fn new(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Arc<Self> {
        Arc::new(Self {
            embedder,
            generator,
        })
    }

    /// Load the embedding model and connect the planner client named in `config`.
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        let embedder = FastEmbedder::new(config)?;
        let generator = OllamaGenerator::new(&config.planner)?;
        tracing::debug!("Loaded embedding model {}", config.model);
        Ok(Self::new(Arc::new(embedder), Arc::new(generator)))
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }
}
