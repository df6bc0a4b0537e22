//! MozaiksCore runtime substrate.
//!
//! A multi-tenant application runtime hosting isolated tenant apps,
//! sandboxed plugins, and an agent workflow engine that streams
//! multi-agent runs to clients over WebSocket. This crate is the
//! runtime core: identity resolution, entitlement enforcement, usage
//! accounting, workflow bundles, the orchestrator, the event pipeline,
//! and session persistence. The HTTP/WebSocket surface lives in
//! `mozaiks-server`; plugin dispatch lives in `mozaiks-plugins`.
//!
//! # Architecture
//!
//! Everything a request touches is an explicit injected dependency with
//! a clear init lifecycle, wired together by the server:
//!
//! - [`auth::TokenValidator`] turns bearer credentials into a trusted
//!   [`auth::Identity`] per request.
//! - [`entitlement::EntitlementStore`] answers capability and limit
//!   checks against pushed, signed manifests.
//! - [`workflow::BundleLoader`] resolves declarative workflow bundles;
//!   [`binding::bind`] materializes them for one run.
//! - [`orchestrator::Orchestrator`] drives turn-based multi-agent runs,
//!   emitting every event through [`pipeline::EventDispatcher`], which
//!   sequences per chat and fans out to persistence, usage accounting,
//!   and the transport in that order.
//! - [`session::SessionStore`] persists sessions, messages, and
//!   artifact states, and replays them on resume.

pub mod artifact;
pub mod auth;
pub mod binding;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod session;
pub mod tool;
pub mod usage;
pub mod workflow;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports for the common wiring surface.
pub use auth::{AuthError, ExecutionTokenService, Identity, TokenValidator};
pub use config::RuntimeConfig;
pub use entitlement::{EntitlementError, EntitlementManifest, EntitlementStore};
pub use error::{Error, Result};
pub use events::{EventEnvelope, RuntimeEvent};
pub use orchestrator::{Orchestrator, OrchestratorDeps, StartOutcome, StartRequest};
pub use pipeline::{EventDispatcher, EventSubscriber};
pub use session::{MemoryStore, SessionStore};
pub use tool::{box_tool, RuntimeTool, Tool, ToolContext, ToolRegistry};
pub use workflow::{BundleLoader, WorkflowBundle};
