//! Domain models for stack deployment
//!
//! Contains the core logic without any I/O concerns: the dependency graph,
//! the resolver that turns stack definitions into an execution plan, and
//! semantic versions.

mod graph;
mod resolver;
mod stack;
mod version;

pub use graph::{Edge, EdgeId, Graph, Vertex, VertexId};
pub use resolver::{resolve, ExecutionPlan, ResolveError, ROOT_VERTEX};
pub use stack::{Dependent, Selection, StackDefinition, StackRef, StackRefError, StackStatus};
pub use version::{Bump, Version, VersionError};
