//! Agent instances and how they are built.
//!
//! An [`AgentInstance`] bundles everything a chat turn or an ingestion needs
//! from the outside world: the credential snapshot it was built from, the
//! embedding backend, the chat model and the tool set. Instances are
//! immutable; a credential change produces a new instance through an
//! [`AgentFactory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::AgentResult;
use crate::llm::{create_chat_model, ChatModel};
use crate::models::CredentialSet;

/// Name of the retrieval tool exposed to the model.
pub const QUERY_TOOL: &str = "query_collection";

/// One immutable agent configuration.
///
/// The tool set is always `[QUERY_TOOL]`. The Composio key is carried in the
/// credential snapshot and reported by the credential store, but no external
/// tool integrations are loaded from it.
pub struct AgentInstance {
    id: Uuid,
    credentials: CredentialSet,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
    tools: Vec<String>,
    created_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(
        credentials: CredentialSet,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            credentials,
            embedder,
            model,
            tools: vec![QUERY_TOOL.to_string()],
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInstance")
            .field("id", &self.id)
            .field("embedding_model", &self.embedder.model_name())
            .field("chat_model", &self.model.model_name())
            .field("tools", &self.tools)
            .field("credentials", &self.credentials)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Builds agent instances from a credential set.
///
/// Implementations must not return an instance whose backends have not
/// accepted the credentials.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, credentials: CredentialSet) -> AgentResult<AgentInstance>;
}

/// Factory backed by the configured embedding and chat providers.
pub struct BackendAgentFactory {
    config: Arc<Config>,
}

impl BackendAgentFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentFactory for BackendAgentFactory {
    async fn build(&self, credentials: CredentialSet) -> AgentResult<AgentInstance> {
        let embedder = create_embedder(&self.config.embedding, &credentials)?;
        let model = create_chat_model(&self.config.model, &credentials)?;

        embedder.verify().await.map_err(|e| e.into_init_error())?;
        model.verify().await.map_err(|e| e.into_init_error())?;

        let instance = AgentInstance::new(credentials, embedder, model);
        tracing::info!(
            id = %instance.id(),
            embedding_model = instance.embedder().model_name(),
            chat_model = instance.model().model_name(),
            "agent instance built"
        );
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::BackendError;
    use crate::llm::CompletionRequest;

    struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        fn model_name(&self) -> &str {
            "silent"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, BackendError> {
            Ok(String::new())
        }

        async fn verify(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn composio_key_does_not_add_tools() {
        let credentials = CredentialSet {
            openai_key: Some("sk-test".into()),
            composio_key: Some("cmp-test".into()),
            embedding_model: None,
        };
        let instance = AgentInstance::new(
            credentials,
            Arc::new(HashEmbedder::new(16)),
            Arc::new(SilentModel),
        );
        assert_eq!(instance.tools().to_vec(), vec![QUERY_TOOL.to_string()]);

        let debug = format!("{:?}", instance);
        assert!(!debug.contains("cmp-test"));
        assert!(debug.contains("hash-16"));
    }
}
