//! ComfyUI REST client and execution service.
//!
//! Provides the HTTP API wrapper, history document interpretation and
//! the [`service::ExecutionService`] contract the pipeline drives.

pub mod api;
pub mod history;
pub mod service;
