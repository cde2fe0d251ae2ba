//! Agent lifecycle state machine.
//!
//! ```text
//! Uninitialized ──► Reinitializing ──► Ready
//!                        │   ▲           │
//!                        ▼   └───────────┤
//!                      Failed ───────────┘ (explicit reinitialize only)
//! ```
//!
//! A new [`AgentInstance`] is constructed without holding any lock and then
//! published by swapping a single pointer. Chat turns clone the `Arc` they
//! start with, so a swap never interrupts them. A failed construction keeps
//! the previous instance serving.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::agent::{AgentFactory, AgentInstance};
use crate::config::LifecycleConfig;
use crate::credentials::CredentialStore;
use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    Reinitializing,
    Failed,
}

/// Snapshot reported by [`LifecycleManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<&'static str>,
}

struct Control {
    state: LifecycleState,
    last_error: Option<AgentError>,
}

pub struct LifecycleManager {
    factory: Arc<dyn AgentFactory>,
    credentials: CredentialStore,
    control: Mutex<Control>,
    active: RwLock<Option<Arc<AgentInstance>>>,
    serve_during_reinit: bool,
    init_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        factory: Arc<dyn AgentFactory>,
        credentials: CredentialStore,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            factory,
            credentials,
            control: Mutex::new(Control {
                state: LifecycleState::Uninitialized,
                last_error: None,
            }),
            active: RwLock::new(None),
            serve_during_reinit: config.serve_during_reinit,
            init_timeout: Duration::from_secs(config.init_timeout_secs),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.control().state
    }

    /// First construction at startup. Same transition as [`reinitialize`](Self::reinitialize).
    pub async fn initialize(&self) -> AgentResult<Arc<AgentInstance>> {
        self.reinitialize().await
    }

    /// Build a new instance from the stored credentials and swap it in.
    ///
    /// Fails with [`AgentError::Busy`] if another reinitialization is in
    /// flight. On failure the previous instance, if any, stays active.
    pub async fn reinitialize(&self) -> AgentResult<Arc<AgentInstance>> {
        self.begin()?;
        let mut guard = ReinitGuard {
            manager: self,
            armed: true,
        };

        let result = self.construct().await;
        guard.armed = false;

        match result {
            Ok(instance) => {
                let instance = Arc::new(instance);
                {
                    let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
                    *active = Some(Arc::clone(&instance));
                }
                self.finish(LifecycleState::Ready, None);
                tracing::info!(id = %instance.id(), "agent ready");
                Ok(instance)
            }
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "agent initialization failed");
                self.finish(LifecycleState::Failed, Some(err.clone()));
                Err(err)
            }
        }
    }

    /// The instance a new chat turn should run against.
    ///
    /// Rejects with [`AgentError::Busy`] while a reinitialization is in
    /// flight unless serving during reinit is enabled.
    pub fn acquire(&self) -> AgentResult<Arc<AgentInstance>> {
        if !self.serve_during_reinit && self.state() == LifecycleState::Reinitializing {
            return Err(AgentError::Busy(
                "agent is reinitializing, retry shortly".to_string(),
            ));
        }
        self.current()
    }

    /// The active instance regardless of an in-flight reinitialization.
    pub fn current(&self) -> AgentResult<Arc<AgentInstance>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| AgentError::NotReady("agent has not been initialized".to_string()))
    }

    pub fn status(&self) -> LifecycleStatus {
        let (state, last_error) = {
            let control = self.control();
            (control.state, control.last_error.clone())
        };
        let active = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        LifecycleStatus {
            state,
            instance_id: active.as_ref().map(|i| i.id().to_string()),
            created_at: active.as_ref().map(|i| i.created_at()),
            embedding_model: active
                .as_ref()
                .map(|i| i.embedder().model_name().to_string()),
            tools: active.map(|i| i.tools().to_vec()).unwrap_or_default(),
            last_error_code: last_error.as_ref().map(|e| e.code()),
            last_error: last_error.map(|e| e.to_string()),
        }
    }

    async fn construct(&self) -> AgentResult<AgentInstance> {
        let credentials = self.credentials.get().await?.unwrap_or_default();
        match tokio::time::timeout(self.init_timeout, self.factory.build(credentials)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::DependencyUnavailable(format!(
                "agent construction timed out after {}s",
                self.init_timeout.as_secs()
            ))),
        }
    }

    fn begin(&self) -> AgentResult<()> {
        let mut control = self.control();
        if control.state == LifecycleState::Reinitializing {
            return Err(AgentError::Busy(
                "a reinitialization is already in progress".to_string(),
            ));
        }
        control.state = LifecycleState::Reinitializing;
        Ok(())
    }

    fn finish(&self, state: LifecycleState, error: Option<AgentError>) {
        let mut control = self.control();
        control.state = state;
        control.last_error = error;
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leaves the manager in `Failed` if a reinitialization future is dropped.
struct ReinitGuard<'a> {
    manager: &'a LifecycleManager,
    armed: bool,
}

impl Drop for ReinitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("agent initialization abandoned");
            self.manager.finish(
                LifecycleState::Failed,
                Some(AgentError::Cancelled(
                    "reinitialization was abandoned before completing".to_string(),
                )),
            );
        }
    }
}
