//! `t2i2v-worker` library crate.
//!
//! Re-exports the command implementations for integration testing. The
//! binary entrypoint lives in `main.rs`.

pub mod cli;
pub mod render;
pub mod templates;
