//! # Stateful Agent
//!
//! Backend for a browser-side assistant that answers questions using a
//! private document collection and the page the user is looking at.
//!
//! Users upload documents, which are extracted, chunked, embedded and kept
//! in a local SQLite vector index. Chat turns retrieve the most similar
//! chunks and hand them, together with the page context, to a language
//! model. Credentials are stored durably and applied by an explicit
//! reinitialization that swaps in a freshly built agent instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Upload  │──▶│   Pipeline   │──▶│    SQLite     │
//! │ (HTTP)   │   │ Extract/Chunk│   │ docs + chunks │
//! └──────────┘   │    /Embed    │   └───────┬───────┘
//!                └──────┬───────┘           │
//!                       │ active instance   │ top-k
//!                ┌──────▼───────┐   ┌───────▼───────┐
//!                │  Lifecycle   │──▶│     Chat      │
//!                │   Manager    │   │ Orchestrator  │
//!                └──────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and machine codes |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`credentials`] | Durable credential record |
//! | [`extract`] | Text extraction from uploaded files |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat-completion backend |
//! | [`agent`] | Agent instances and their factory |
//! | [`lifecycle`] | Agent lifecycle state machine |
//! | [`corpus`] | Stored documents and blobs |
//! | [`index`] | Vector index over chunks |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`chat`] | Chat orchestration |
//! | [`app`] | Component wiring |
//! | [`server`] | HTTP server |

pub mod agent;
pub mod app;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod server;
