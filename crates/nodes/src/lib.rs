//! `nodes` crate: the node type contract and the built-in node types.
//!
//! Every node type implements [`Node`]; the engine dispatches through the
//! erased [`NodeType`] trait object looked up in a [`NodeRegistry`].

pub mod builtin;
pub mod error;
pub mod http;
pub mod mock;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod template;
pub mod traits;

pub use error::{LookupError, NodeError, NodeErrorKind};
pub use http::{HttpConfig, HttpTransport, ReqwestTransport};
pub use registry::NodeRegistry;
pub use sandbox::{Isolation, Sandbox, SandboxConfig};
pub use schema::{OutputSchema, SchemaField, SchemaType};
pub use traits::{ExecutionContext, ExecutionResult, Node, NodeType, NodeValueLookup};
