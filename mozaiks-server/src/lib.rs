//! HTTP API, WebSocket transport, and AG-UI emission for the Mozaiks
//! runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mozaiks_core::provider::HttpProvider;
//! use mozaiks_core::session::MemoryStore;
//! use mozaiks_core::tool::ToolRegistry;
//! use mozaiks_core::RuntimeConfig;
//! use mozaiks_server::{build_router, AppState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::from_env();
//! let provider = Arc::new(HttpProvider::new("https://api.openai.com", None));
//! let state = AppState::build(
//!     config,
//!     provider,
//!     Arc::new(ToolRegistry::new()),
//!     Arc::new(MemoryStore::new()),
//! );
//! let _background = state.spawn_background_tasks();
//!
//! let app = build_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod agui;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;

// Re-exports
pub use actions::{ActionExecutor, ArtifactAction};
pub use agui::{AguiEvent, FramingState, JsonPatchOp};
pub use error::{ApiError, ApiResult};
pub use router::build_router;
pub use state::AppState;
pub use ws::ConnectionRegistry;
