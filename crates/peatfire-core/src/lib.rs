//! Peatland fire-risk core: synthetic displacement, hydrological dryness
//! memory, fire simulation, threshold training and risk classification.

pub mod classifier;
pub mod config;
pub mod displacement;
pub mod dryness;
pub mod error;
pub mod fire;
pub mod grid;
pub mod pipeline;
pub mod risk;
pub mod samples;
pub mod store;
pub mod synth;

pub use config::{ConfigError, PeatfireConfig};
pub use error::{PeatError, Result};
pub use grid::{FireMask, GeoRef, Grid, GridSpec};
pub use pipeline::{Assessment, Backfill, CycleReport, LivePipeline, TrainingCycle};
pub use risk::RiskLevel;
