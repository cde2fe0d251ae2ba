//! Shared fixtures: a temp-dir config and an in-process agent factory whose
//! backends never touch the network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use stateful_agent::agent::{AgentFactory, AgentInstance};
use stateful_agent::app::App;
use stateful_agent::config::{parse_config, Config};
use stateful_agent::embedding::{EmbeddingProvider, HashEmbedder};
use stateful_agent::error::{AgentError, AgentResult, BackendError};
use stateful_agent::llm::{ChatModel, CompletionRequest};
use stateful_agent::models::{CredentialSet, CredentialUpdate};

/// Key the mock backends reject as invalid.
pub const INVALID_KEY: &str = "sk-invalid";
/// Key for which the mock backends behave as unreachable.
pub const UNREACHABLE_KEY: &str = "sk-unreachable";
pub const DEFAULT_MODEL: &str = "hash-test";

pub fn test_config(root: &Path) -> Config {
    parse_config(&format!(
        r#"
[db]
path = '{root}/data/agent.sqlite'

[storage]
corpus_dir = '{root}/corpus'

[chunking]
max_chars = 200
overlap_chars = 20

[embedding]
provider = "hash"
batch_size = 8
max_retries = 0
timeout_secs = 5

[model]
timeout_secs = 5

[lifecycle]
init_timeout_secs = 5
init_on_start = false
"#,
        root = root.display()
    ))
    .unwrap()
}

/// Pauses an embedding call until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChatMode {
    /// Reply with the full prompt, so tests can see what was retrieved.
    #[default]
    Echo,
    Empty,
    Fail,
}

#[derive(Default)]
pub struct MockSettings {
    pub fail_embedding: bool,
    pub gate: Option<Arc<Gate>>,
    pub chat: ChatMode,
    pub build_delay: Duration,
}

pub struct TestEmbedder {
    inner: HashEmbedder,
    model: String,
    fail: bool,
    gate: Option<Arc<Gate>>,
}

#[async_trait]
impl EmbeddingProvider for TestEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail {
            return Err(BackendError::Unavailable("embedding backend down".into()));
        }
        self.inner.embed(texts).await
    }

    async fn verify(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub struct TestChat {
    mode: ChatMode,
}

#[async_trait]
impl ChatModel for TestChat {
    fn model_name(&self) -> &str {
        "test-chat"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        match self.mode {
            ChatMode::Echo => Ok(request.prompt.clone()),
            ChatMode::Empty => Ok(String::new()),
            ChatMode::Fail => Err(BackendError::Unavailable("model backend down".into())),
        }
    }

    async fn verify(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Factory mirroring the real one's credential handling.
#[derive(Default)]
pub struct MockFactory {
    pub settings: Mutex<MockSettings>,
    pub builds: AtomicUsize,
}

impl MockFactory {
    pub fn configure(&self, f: impl FnOnce(&mut MockSettings)) {
        f(&mut self.settings.lock().unwrap());
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentFactory for MockFactory {
    async fn build(&self, credentials: CredentialSet) -> AgentResult<AgentInstance> {
        let (fail_embedding, gate, chat, delay) = {
            let s = self.settings.lock().unwrap();
            (s.fail_embedding, s.gate.clone(), s.chat.clone(), s.build_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match credentials.openai_key.as_deref() {
            None => {
                return Err(AgentError::Authentication(
                    "no OpenAI API key configured".into(),
                ))
            }
            Some(INVALID_KEY) => {
                return Err(AgentError::Authentication("401 invalid api key".into()))
            }
            Some(UNREACHABLE_KEY) => {
                return Err(AgentError::DependencyUnavailable(
                    "connection refused".into(),
                ))
            }
            Some(_) => {}
        }

        let model = credentials
            .embedding_model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let embedder = Arc::new(TestEmbedder {
            inner: HashEmbedder::new(256),
            model,
            fail: fail_embedding,
            gate,
        });
        let chat = Arc::new(TestChat { mode: chat });

        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(AgentInstance::new(credentials, embedder, chat))
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub app: App,
    pub factory: Arc<MockFactory>,
}

pub async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let factory = Arc::new(MockFactory::default());
    let app = App::open_with_factory(config, factory.clone()).await.unwrap();
    TestEnv { tmp, app, factory }
}

/// Store a valid key and build the first instance.
pub async fn setup_ready() -> TestEnv {
    let env = setup().await;
    set_key(&env.app, "sk-test").await;
    env.app.lifecycle.reinitialize().await.unwrap();
    env
}

pub async fn set_key(app: &App, key: &str) {
    app.credentials
        .update(CredentialUpdate {
            openai_key: Some(key.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
}
