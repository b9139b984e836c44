//! Core types shared across the pipeline.
//!
//! - [`Frame`] is one complete compressed image with a store-assigned
//!   sequence number; cloning it shares the payload
//! - [`PixelFormat`] names the capture formats the relay can request
//! - [`PipelineState`] is the lifecycle both loops move through

mod frame;
mod pixel_format;
mod state;

pub use frame::{Frame, copy_payload};
pub use pixel_format::PixelFormat;
pub use state::PipelineState;
