//! Workflow-parameter mapping engine.
//!
//! Takes a ComfyUI-style job graph plus a flat parameter set and
//! produces a modified copy of the graph ready for submission. Node
//! roles are found either from a fixed id table or by structural
//! inference over node types and input fields.

pub mod error;
pub mod graph;
pub mod mapper;
pub mod params;
pub mod resolver;
