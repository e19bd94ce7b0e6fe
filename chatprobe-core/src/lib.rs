//! # chatprobe-core
//!
//! Core library for chatprobe - an end-to-end probe for chat completion
//! services with a browser UI.
//!
//! This library provides:
//! - Domain types for chats, messages, and knowledge collections
//! - Normalization of the reply shapes the service returns for a chat
//! - Synchronization of the list view and history map of a chat
//! - Readiness polling and artifact publishing
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Everything remote goes through the [`ChatService`] trait:
//! - **Reconciliation:** [`normalize`], [`extract`], and [`sync`] are pure
//!   over snapshots and never touch the network themselves
//! - **Waiting:** [`poller`] and [`publisher`] loop over the service with
//!   bounded retries from [`retry`]
//! - **Driving:** [`workflow`] runs one probe and reports the outcome
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatprobe_core::{ChatClient, Config, Workflow};
//!
//! # async fn probe() -> chatprobe_core::Result<()> {
//! let config = Config::load()?;
//! config.validate()?;
//!
//! let client = ChatClient::new(&config.server)?;
//! let workflow = Workflow::new(&client, &config)?;
//! let report = workflow.run("Health check: say pong.").await;
//! println!("passed: {}", report.success);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use artifacts::ArtifactStore;
pub use client::ChatClient;
pub use config::Config;
pub use error::{Error, Result};
pub use normalize::{normalize_chat, ChatEnvelope};
pub use poller::{PollOutcome, ReadinessPoller};
pub use publisher::{ArtifactPublisher, PublishReport, PublisherOptions};
pub use retry::{Backoff, RetryPolicy};
pub use service::ChatService;
pub use sync::{apply_assistant_text, synchronize};
pub use types::*;
pub use workflow::{verify_ui_state, Workflow, WorkflowReport};

// Public modules
pub mod artifacts;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod normalize;
pub mod poller;
pub mod publisher;
pub mod retry;
pub mod service;
pub mod sync;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod testing;
