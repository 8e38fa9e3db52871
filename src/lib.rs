//! Turbulence box diagnostics - Animated plots of 2D plasma simulation runs.
//!
//! This crate reads a range of simulation snapshots once, shares the fetched
//! fields between every requested plot and renders heatmaps, Fourier
//! spectra, structure functions, kurtosis and RMS time series in parallel.
//!
//! # Architecture
//!
//! - `schema`: Variables, animation requests and run configuration
//! - `reader`: Snapshot access (JSON files or synthetic turbulence)
//! - `compute`: Spectra, statistics and increments
//! - `pipeline`: Resolve, fetch, dispatch and teardown
//! - `render`: One renderer per animation kind, producing frame plots
//! - `animation`: Encoders for video, still images and frame archives
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use turbulence_viz::{
//!     animation::FileEncoders,
//!     pipeline,
//!     schema::{RawRequest, RunConfig},
//! };
//! use serde_json::json;
//!
//! let config = RunConfig {
//!     end_frame: 10,
//!     animations: vec![
//!         RawRequest::new("2D", "B", "x", json!("unitless")),
//!         RawRequest::new("fourier", "B", "perp", json!(["1D"])),
//!     ],
//!     ..RunConfig::default()
//! };
//!
//! let summary = pipeline::run(&config, Arc::new(FileEncoders)).unwrap();
//! println!("{summary}");
//! ```

pub mod animation;
pub mod compute;
pub mod pipeline;
pub mod reader;
pub mod render;
pub mod schema;

// Re-export commonly used types
pub use pipeline::{RunError, RunSummary, run};
pub use schema::{AnimationRequest, RawRequest, RunConfig};
