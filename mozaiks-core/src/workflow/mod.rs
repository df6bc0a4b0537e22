//! Declarative workflow bundles: parsing, validation, and caching.

mod bundle;
mod loader;
pub mod schema;

pub use bundle::{
    AgentDef, HandoffRule, LifecycleTrigger, ToolDef, ToolKind, UiSpec, WorkflowBundle,
};
pub use loader::BundleLoader;
pub use schema::{FieldType, ModelDef, SchemaRegistry, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("workflow bundle not found: {0}")]
    NotFound(String),

    #[error("workflow bundle invalid: {0}")]
    Invalid(String),
}

impl BundleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "BUNDLE_NOT_FOUND",
            Self::Invalid(_) => "BUNDLE_INVALID",
        }
    }
}
