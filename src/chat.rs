//! Chat orchestration: retrieve, assemble, complete.
//!
//! A turn embeds the user message with the active instance's embedder,
//! pulls the top-k chunks from the index, builds a prompt from those chunks
//! and the page the user is looking at, and asks the chat model for a reply.
//! Nothing about a turn is persisted.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentInstance;
use crate::config::Config;
use crate::embedding::embed_query;
use crate::error::{AgentError, AgentResult};
use crate::index::VectorIndex;
use crate::lifecycle::LifecycleManager;
use crate::llm::CompletionRequest;
use crate::models::{ChatTurn, PageContext, RetrievedChunk};

/// Reply used when the model answers with nothing.
pub const FALLBACK_RESPONSE: &str = "I'm sorry, I couldn't generate a response.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant embedded in the user's browser. \
Answer using the provided document excerpts and the current page when they are relevant. \
If they do not contain the answer, say so briefly and answer from general knowledge.";

const FIELD_SYSTEM_PROMPT: &str = "You draft text for a form field on a web page. \
Reply with the field value only, without quotes or explanations.";

/// Excerpts longer than this are cut before being placed in a prompt.
const MAX_EXCERPT_CHARS: usize = 4000;

/// A request to draft the value of a form field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRequest {
    #[serde(default)]
    pub context: PageContext,
    #[serde(default)]
    pub input_type: String,
    #[serde(default)]
    pub input_id: String,
    #[serde(default)]
    pub input_name: String,
    #[serde(default)]
    pub placeholder: String,
}

pub struct ChatOrchestrator {
    lifecycle: Arc<LifecycleManager>,
    index: Arc<VectorIndex>,
    top_k: usize,
    temperature: f32,
    call_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(config: &Config, lifecycle: Arc<LifecycleManager>, index: Arc<VectorIndex>) -> Self {
        Self {
            lifecycle,
            index,
            top_k: config.retrieval.top_k,
            temperature: config.model.temperature,
            call_timeout: Duration::from_secs(config.model.timeout_secs),
        }
    }

    /// Answer one chat message.
    pub async fn respond(&self, message: &str, context: PageContext) -> AgentResult<ChatTurn> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::Validation("message must not be empty".to_string()));
        }

        // Held for the whole turn; a reinit swapping the instance does not affect us.
        let agent = self.lifecycle.acquire()?;

        let retrieved = self.retrieve(&agent, message).await?;
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_chat_prompt(message, &context, &retrieved),
            temperature: self.temperature,
            max_tokens: None,
        };
        let response = self.complete(&agent, &request).await?;

        tracing::info!(
            agent = %agent.id(),
            retrieved = retrieved.len(),
            "chat turn answered"
        );
        Ok(ChatTurn {
            message: message.to_string(),
            context,
            retrieved,
            response,
        })
    }

    /// Draft a value for a form field on the page.
    pub async fn generate_field(&self, request: FieldRequest) -> AgentResult<ChatTurn> {
        let agent = self.lifecycle.acquire()?;

        let query = field_query(&request);
        let retrieved = if query.is_empty() {
            Vec::new()
        } else {
            self.retrieve(&agent, &query).await?
        };

        let completion = CompletionRequest {
            system: FIELD_SYSTEM_PROMPT.to_string(),
            prompt: build_field_prompt(&request, &retrieved),
            temperature: self.temperature,
            max_tokens: Some(512),
        };
        let response = self.complete(&agent, &completion).await?;

        Ok(ChatTurn {
            message: query,
            context: request.context,
            retrieved,
            response,
        })
    }

    async fn retrieve(&self, agent: &AgentInstance, text: &str) -> AgentResult<Vec<RetrievedChunk>> {
        let embedder = agent.embedder();
        let vector = match tokio::time::timeout(self.call_timeout, embed_query(embedder, text)).await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(AgentError::Upstream(format!("embedding failed: {}", e))),
            Err(_) => return Err(AgentError::Upstream("embedding timed out".to_string())),
        };
        self.index
            .query(&vector, embedder.model_name(), self.top_k)
            .await
    }

    async fn complete(
        &self,
        agent: &AgentInstance,
        request: &CompletionRequest,
    ) -> AgentResult<String> {
        let reply = match tokio::time::timeout(self.call_timeout, agent.model().complete(request))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(AgentError::Upstream(format!("completion failed: {}", e))),
            Err(_) => return Err(AgentError::Upstream("completion timed out".to_string())),
        };

        if reply.trim().is_empty() {
            Ok(FALLBACK_RESPONSE.to_string())
        } else {
            Ok(reply)
        }
    }
}

// ============ Prompt assembly ============

fn build_chat_prompt(message: &str, context: &PageContext, retrieved: &[RetrievedChunk]) -> String {
    let mut prompt = String::new();
    push_documents(&mut prompt, retrieved);
    push_page(&mut prompt, context);
    prompt.push_str("## Question\n");
    prompt.push_str(message);
    prompt.push('\n');
    prompt
}

fn build_field_prompt(request: &FieldRequest, retrieved: &[RetrievedChunk]) -> String {
    let mut prompt = String::new();
    push_documents(&mut prompt, retrieved);
    push_page(&mut prompt, &request.context);

    prompt.push_str("## Field\n");
    for (label, value) in [
        ("Type", &request.input_type),
        ("Id", &request.input_id),
        ("Name", &request.input_name),
        ("Placeholder", &request.placeholder),
    ] {
        if !value.trim().is_empty() {
            prompt.push_str(&format!("{}: {}\n", label, value.trim()));
        }
    }
    prompt.push_str("\nWrite a suitable value for this field.\n");
    prompt
}

fn push_documents(prompt: &mut String, retrieved: &[RetrievedChunk]) {
    if retrieved.is_empty() {
        return;
    }
    prompt.push_str("## Documents\n");
    for chunk in retrieved {
        prompt.push_str(&format!("[{} #{}]\n{}\n\n", chunk.filename, chunk.seq, chunk.text));
    }
}

fn push_page(prompt: &mut String, context: &PageContext) {
    let title = context.title.trim();
    let description = context.description.trim();
    let excerpt = truncate_chars(context.excerpt.trim(), MAX_EXCERPT_CHARS);
    if title.is_empty() && description.is_empty() && excerpt.is_empty() {
        return;
    }

    prompt.push_str("## Current page\n");
    if !title.is_empty() {
        prompt.push_str(&format!("Title: {}\n", title));
    }
    if !description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", description));
    }
    if !excerpt.is_empty() {
        prompt.push_str(&format!("Excerpt:\n{}\n", excerpt));
    }
    prompt.push('\n');
}

/// Retrieval query for a field: its descriptive attributes plus the page title.
fn field_query(request: &FieldRequest) -> String {
    [
        request.input_name.as_str(),
        request.placeholder.as_str(),
        request.context.title.as_str(),
    ]
    .iter()
    .map(|s| s.trim())
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(filename: &str, seq: i64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            filename: filename.to_string(),
            seq,
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn chat_prompt_contains_documents_page_and_question() {
        let context = PageContext {
            title: "Travel guide".into(),
            description: String::new(),
            excerpt: "Visiting Europe in spring.".into(),
        };
        let prompt = build_chat_prompt(
            "What is the capital of France?",
            &context,
            &[chunk("notes.txt", 0, "The capital of France is Paris.")],
        );

        assert!(prompt.contains("[notes.txt #0]\nThe capital of France is Paris."));
        assert!(prompt.contains("Title: Travel guide"));
        assert!(!prompt.contains("Description:"));
        assert!(prompt.contains("Excerpt:\nVisiting Europe in spring."));
        assert!(prompt.ends_with("## Question\nWhat is the capital of France?\n"));
    }

    #[test]
    fn empty_page_and_no_documents_leave_only_the_question() {
        let prompt = build_chat_prompt("hello", &PageContext::default(), &[]);
        assert_eq!(prompt, "## Question\nhello\n");
    }

    #[test]
    fn excerpt_is_truncated() {
        let context = PageContext {
            excerpt: "é".repeat(MAX_EXCERPT_CHARS + 50),
            ..Default::default()
        };
        let prompt = build_chat_prompt("q", &context, &[]);
        assert_eq!(prompt.matches('é').count(), MAX_EXCERPT_CHARS);
    }

    #[test]
    fn field_prompt_lists_non_empty_attributes() {
        let request = FieldRequest {
            input_type: "email".into(),
            input_name: "contact".into(),
            placeholder: "you@example.com".into(),
            ..Default::default()
        };
        let prompt = build_field_prompt(&request, &[]);
        assert!(prompt.contains("Type: email\n"));
        assert!(prompt.contains("Name: contact\n"));
        assert!(prompt.contains("Placeholder: you@example.com\n"));
        assert!(!prompt.contains("Id:"));
    }

    #[test]
    fn field_request_uses_camel_case() {
        let request: FieldRequest = serde_json::from_value(serde_json::json!({
            "context": { "title": "Signup" },
            "inputType": "text",
            "inputId": "first",
            "inputName": "first_name",
            "placeholder": "First name"
        }))
        .unwrap();
        assert_eq!(request.input_id, "first");
        assert_eq!(field_query(&request), "first_name First name Signup");
    }
}
