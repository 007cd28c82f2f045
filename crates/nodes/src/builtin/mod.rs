//! Built-in node types.

pub mod api_call;
pub mod output;
pub mod transform;
pub mod trigger;

pub use api_call::{ApiCallNode, ApiCallParams, HeaderEntry};
pub use output::{ReturnNode, ReturnParams, UiNode, UiParams};
pub use transform::{TransformNode, TransformParams};
pub use trigger::{TriggerKind, TriggerNode, TriggerParams};
