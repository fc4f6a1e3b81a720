//! Text-to-image-to-video pipeline.
//!
//! The [`sequencer::Sequencer`] drives a configured number of iterations
//! against an [`ExecutionService`](t2i2v_comfyui::service::ExecutionService):
//! render an image, move it into the service's input area, render a video
//! from it, and record everything under the pipeline root.

pub mod config;
pub mod error;
pub mod frames;
pub mod locator;
pub mod persistence;
pub mod reference;
pub mod sequencer;
pub mod stages;
