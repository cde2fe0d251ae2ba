//! Application wiring.
//!
//! [`App`] owns one of each component and is cloned into every request
//! handler and CLI command. Storage is opened and migrated before the agent
//! is first constructed.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::agent::{AgentFactory, BackendAgentFactory};
use crate::chat::ChatOrchestrator;
use crate::config::Config;
use crate::corpus::Corpus;
use crate::credentials::CredentialStore;
use crate::db;
use crate::index::VectorIndex;
use crate::ingest::IngestPipeline;
use crate::lifecycle::LifecycleManager;

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub credentials: CredentialStore,
    pub corpus: Corpus,
    pub index: Arc<VectorIndex>,
    pub lifecycle: Arc<LifecycleManager>,
    pub pipeline: IngestPipeline,
    pub chat: Arc<ChatOrchestrator>,
}

impl App {
    /// Open storage and wire the components against the configured backends.
    pub async fn open(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let factory = Arc::new(BackendAgentFactory::new(Arc::clone(&config)));
        Self::build(config, factory).await
    }

    /// Same as [`open`](Self::open) with a caller-supplied agent factory.
    pub async fn open_with_factory(config: Config, factory: Arc<dyn AgentFactory>) -> Result<Self> {
        Self::build(Arc::new(config), factory).await
    }

    async fn build(config: Arc<Config>, factory: Arc<dyn AgentFactory>) -> Result<Self> {
        let pool = db::open(&config).await?;

        tokio::fs::create_dir_all(&config.storage.corpus_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create corpus directory: {}",
                    config.storage.corpus_dir.display()
                )
            })?;

        let credentials = CredentialStore::new(pool.clone());
        let corpus = Corpus::new(pool.clone(), config.storage.corpus_dir.clone());
        let index = Arc::new(VectorIndex::new(pool, corpus.clone()));
        let lifecycle = Arc::new(LifecycleManager::new(
            factory,
            credentials.clone(),
            &config.lifecycle,
        ));
        let pipeline = IngestPipeline::new(
            &config,
            Arc::clone(&lifecycle),
            Arc::clone(&index),
            corpus.clone(),
        );
        let chat = Arc::new(ChatOrchestrator::new(
            &config,
            Arc::clone(&lifecycle),
            Arc::clone(&index),
        ));

        Ok(Self {
            config,
            credentials,
            corpus,
            index,
            lifecycle,
            pipeline,
            chat,
        })
    }

    /// Seed credentials from the environment and build the first agent.
    ///
    /// A failed first construction is logged, not returned: the process keeps
    /// serving and reports `NotReady` until a successful reinitialization.
    pub async fn start(&self) -> Result<()> {
        self.credentials
            .seed_from_env()
            .await
            .context("Failed to seed credentials")?;

        if self.config.lifecycle.init_on_start {
            if let Err(e) = self.lifecycle.initialize().await {
                tracing::warn!(code = e.code(), error = %e, "starting without an agent");
            }
        }
        Ok(())
    }
}
