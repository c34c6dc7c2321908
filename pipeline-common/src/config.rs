use crate::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Type of sampling lattice.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
    Rect,
    Hex,
}

/// Policy for the connectivity cleanup stage. The choice is explicit
/// configuration, never inferred from the grid type.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityMethod {
    /// 6-connected component traversal on step-normalized voxel coordinates.
    Graph,
    /// Single-linkage clustering under a nearest-neighbor distance threshold.
    Distance,
}

// Configuration for the image sampling stage
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SampleConfig {
    #[serde(default = "default_grid")]
    pub grid: GridKind,
    /// Distance between samples (um).
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Image channel indices to sample.
    #[serde(default = "default_channels")]
    pub channels: Vec<usize>,
    /// Margin (voxels) excluded at each image boundary during generation.
    #[serde(default)]
    pub margin: usize,
}

// Configuration for the sample post-processing stage
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProcessConfig {
    /// Remove cells whose samples touch the image boundary.
    #[serde(default = "default_true")]
    pub edges: bool,
    /// Distance (voxels) from the boundary still counted as touching.
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f64,
    /// Keep only the largest connected region per cell.
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default = "default_connectivity")]
    pub connectivity: ConnectivityMethod,
    /// Distance threshold (um) for the `distance` method. When unset, it is
    /// derived as 1.5x the smallest physical grid spacing.
    #[serde(default)]
    pub connected_threshold: Option<f64>,
    /// User scale factor applied with the physical voxel scales. Rescaling
    /// is skipped entirely when unset.
    #[serde(default)]
    pub scale_factor: Option<f64>,
    /// Keep only these ids.
    #[serde(default)]
    pub include_ids: Option<Vec<u32>>,
    /// Drop these ids.
    #[serde(default)]
    pub exclude_ids: Option<Vec<u32>>,
}

// Configuration for the Voronoi boundary estimation stage
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VoronoiConfig {
    /// Image channel to estimate boundaries for.
    #[serde(default)]
    pub channel: usize,
    /// Number of boundary mask dilation rounds.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Target output height (slices); the estimated volume's z extent is
    /// clamped to this many slices centered on the mask.
    pub target_height: usize,
}

// Configuration for the ARCADE conversion stage
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ArcadeConfig {
    /// Margin (voxels) padding the sample bounding box in x, y, and z.
    #[serde(default)]
    pub margins: (i64, i64, i64),
    /// Region key restricting conversion to one labeled sub-region.
    #[serde(default)]
    pub region: Option<String>,
    /// Storage key for the reference distribution file.
    #[serde(default)]
    pub reference: Option<String>,
}

// Configuration for mesh and shape reconstruction
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReconstructConfig {
    /// Regions with fewer voxels than this are skipped.
    #[serde(default = "default_minimum_voxels")]
    pub minimum_voxels: usize,
    /// Spherical harmonics order for the shape descriptor.
    #[serde(default = "default_order")]
    pub order: usize,
    /// Emit a z-plane cross-section outline per mesh.
    #[serde(default)]
    pub slice_meshes: bool,
}

// Configuration for colony metrics
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MetricsConfig {
    /// Distance cutoff (um) for two cells to count as neighbors.
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,
}

fn default_grid() -> GridKind {
    GridKind::Rect
}

fn default_resolution() -> f64 {
    1.0
}

fn default_channels() -> Vec<usize> {
    vec![0]
}

fn default_true() -> bool {
    true
}

fn default_edge_threshold() -> f64 {
    1.0
}

fn default_connectivity() -> ConnectivityMethod {
    ConnectivityMethod::Graph
}

fn default_iterations() -> u32 {
    10
}

fn default_minimum_voxels() -> usize {
    4
}

fn default_order() -> usize {
    16
}

fn default_cutoff() -> f64 {
    30.0
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            grid: default_grid(),
            resolution: default_resolution(),
            channels: default_channels(),
            margin: 0,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            edges: true,
            edge_threshold: default_edge_threshold(),
            connected: true,
            connectivity: default_connectivity(),
            connected_threshold: None,
            scale_factor: None,
            include_ids: None,
            exclude_ids: None,
        }
    }
}

impl Default for ArcadeConfig {
    fn default() -> Self {
        Self {
            margins: (0, 0, 0),
            region: None,
            reference: None,
        }
    }
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            minimum_voxels: default_minimum_voxels(),
            order: default_order(),
            slice_meshes: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
        }
    }
}

// Main pipeline configuration structure, loaded from TOML.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Name of the series; first segment of every storage key.
    pub name: String,
    /// Working location root for all load/save operations.
    pub working: String,
    /// Condition keys to process.
    pub keys: Vec<String>,
    /// Voxel size in the imaging plane (um/voxel).
    pub scale_xy: f64,
    /// Voxel size along z (um/voxel).
    pub scale_z: f64,
    #[serde(default)]
    pub sample: SampleConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub voronoi: Option<VoronoiConfig>,
    #[serde(default)]
    pub arcade: ArcadeConfig,
    #[serde(default)]
    pub reconstruct: ReconstructConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Loads the pipeline configuration from a TOML file and validates it
    /// eagerly, before any stage runs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: PipelineConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks option values and mutually exclusive combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scale_xy <= 0.0 || self.scale_z <= 0.0 {
            return Err(ConfigError::InvalidOption {
                option: "scale_xy/scale_z".to_string(),
                reason: "voxel scales must be positive".to_string(),
            });
        }
        if self.sample.resolution <= 0.0 {
            return Err(ConfigError::InvalidOption {
                option: "sample.resolution".to_string(),
                reason: "resolution must be positive".to_string(),
            });
        }
        if self.process.include_ids.is_some() && self.process.exclude_ids.is_some() {
            return Err(ConfigError::MutuallyExclusive {
                first: "process.include_ids".to_string(),
                second: "process.exclude_ids".to_string(),
            });
        }
        if let Some(threshold) = self.process.connected_threshold {
            if threshold <= 0.0 {
                return Err(ConfigError::InvalidOption {
                    option: "process.connected_threshold".to_string(),
                    reason: "threshold must be positive".to_string(),
                });
            }
        }
        if let Some(voronoi) = &self.voronoi {
            if voronoi.target_height == 0 {
                return Err(ConfigError::InvalidOption {
                    option: "voronoi.target_height".to_string(),
                    reason: "target height must be at least one slice".to_string(),
                });
            }
        }
        if self.reconstruct.order == 0 {
            return Err(ConfigError::InvalidOption {
                option: "reconstruct.order".to_string(),
                reason: "spherical harmonics order must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PipelineConfig {
        PipelineConfig {
            name: "series".to_string(),
            working: "/tmp/work".to_string(),
            keys: vec!["A1".to_string()],
            scale_xy: 0.108333,
            scale_z: 0.29,
            sample: SampleConfig::default(),
            process: ProcessConfig::default(),
            voronoi: None,
            arcade: ArcadeConfig::default(),
            reconstruct: ReconstructConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn include_and_exclude_lists_are_mutually_exclusive() {
        let mut config = base_config();
        config.process.include_ids = Some(vec![1]);
        config.process.exclude_ids = Some(vec![2]);

        match config.validate() {
            Err(ConfigError::MutuallyExclusive { first, second }) => {
                assert_eq!(first, "process.include_ids");
                assert_eq!(second, "process.exclude_ids");
            }
            other => panic!("expected mutually exclusive error, got {:?}", other),
        }
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let mut config = base_config();
        config.sample.resolution = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            name = "series"
            working = "/data"
            keys = ["A1", "B2"]
            scale_xy = 0.108333
            scale_z = 0.29

            [sample]
            grid = "hex"
            resolution = 2.0

            [voronoi]
            channel = 1
            iterations = 5
            target_height = 20
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample.grid, GridKind::Hex);
        assert_eq!(config.sample.channels, vec![0]);
        let voronoi = config.voronoi.unwrap();
        assert_eq!(voronoi.iterations, 5);
        assert_eq!(voronoi.target_height, 20);
    }
}
