//! Recording readers for dataman.
//!
//! Open Ephys `.continuous` directories and raw `.dat` files are read through
//! the [`dm_core::traits::SampleSource`] trait; [`target`] recognises what a
//! path holds and [`streamer`] feeds the viewer from a background thread.

pub mod continuous;
pub mod dat;
pub mod error;
pub mod streamer;
pub mod target;

pub use error::FormatError;
pub use streamer::{Cursor, StreamCommand, StreamerHandle, spawn_streamer};
pub use target::{TargetKind, describe, detect, metadata_from_target, open_source};
