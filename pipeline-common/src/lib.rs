pub mod config;
pub mod error;
pub mod keys;
pub mod sample;
pub mod store;
pub mod volume;

// Re-export key types for easier use by dependent crates
pub use config::{
    ArcadeConfig, ConnectivityMethod, GridKind, MetricsConfig, PipelineConfig, ProcessConfig,
    ReconstructConfig, SampleConfig, VoronoiConfig,
};
pub use error::{ConfigError, PipelineError, ReconstructionSkipped, RunDiagnostics};
pub use sample::{Cell, Sample, SampleSet};
pub use volume::ImageVolume;
