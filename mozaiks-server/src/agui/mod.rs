//! AG-UI dual emission.

pub mod convert;
pub mod events;

pub use convert::{convert_envelope, AguiIds, FramingState};
pub use events::{AguiEvent, JsonPatchOp, MessageRole, SnapshotMode};
