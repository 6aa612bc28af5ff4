//! `crewsafe-perception` – The Eyes
//!
//! Turns camera frames (and optional range readings) into a stabilized
//! obstacle verdict and, in precision mode, gap alignment guidance.
//!
//! # Modules
//!
//! - [`preprocess`] – grayscale conversion and binomial smoothing.
//! - [`scanner`] – directionless Sobel gradient and per-column nearest edge.
//! - [`detector`] – thin-object aware forward obstacle decision.
//! - [`hysteresis`] – asymmetric "fast to alarm, slow to clear" filter.
//! - [`gap`] – widest passable gap and its alignment offset.
//! - [`range`] – single-point range sensor smoothing and zone classification.
//! - [`pipeline`] – one full perception cycle per frame, producing a
//!   [`DetectorSnapshot`][crewsafe_types::DetectorSnapshot] ready to publish.

pub mod detector;
pub mod gap;
pub mod hysteresis;
pub mod pipeline;
pub mod preprocess;
pub mod range;
pub mod scanner;

pub use detector::{DetectorConfig, ObstacleDetector};
pub use gap::{GapAnalyzer, GapConfig, GapStrategy};
pub use hysteresis::HysteresisStabilizer;
pub use pipeline::{PerceptionConfig, PerceptionPipeline};
pub use preprocess::{GrayFrame, preprocess};
pub use range::{RangeConfig, RangeSensorAdapter};
pub use scanner::{ColumnEdge, ColumnProfile, EdgeScanner, ScanResult};
