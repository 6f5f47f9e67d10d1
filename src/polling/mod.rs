//! Checkpointed polling of change-log queries.
//!
//! A command template names its cursor with quoted watermark markers such
//! as `'$timestamp_begin$'`. Each run rewrites the markers to positional
//! placeholders, pages through the results, classifies rows by a
//! discriminator column and persists the advanced checkpoints.

pub mod classifier;
pub mod extractor;
pub mod marker;
pub mod point;

pub use classifier::Classifier;
pub use extractor::{PollingExtractor, RowReader, RunStatus};
pub use marker::{Bound, Clock, FixedClock, Family, MarkerCatalog, SystemClock, Watermark, WatermarkValue};
pub use point::{checkpoint_key, Point};
