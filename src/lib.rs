//! Core of a CT image-stack preprocessing engine: a multi-level thumbnail pyramid builder
//! with deterministic weighted progress aggregation and bounded-concurrency worker
//! coordination, backed by a cropped-volume extractor.
//!
//! See `SPEC_FULL.md` for the full specification this crate implements. The Qt desktop
//! shell, file-picker dialog, 3D isosurface viewer, and export writers that consume this
//! crate's outputs are out of scope here.

pub mod builder;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod downsample;
pub mod error;
pub mod path_safety;
pub mod planner;
pub mod progress;
pub mod scanner;
pub mod volume;

pub use builder::{build, BuildOutcome, BuildStatus};
pub use config::PyramidConfig;
pub use error::{CoreError, Result};
pub use planner::{LevelSpec, PyramidPlan};
pub use progress::{CancelToken, NoOpSink, ProgressSink};
pub use scanner::StackDescriptor;
pub use volume::{crop, CropRequest, CroppedVolume, MinimumVolume};
