use thiserror::Error;

/// Invalid or mutually exclusive configuration options.
///
/// Raised eagerly when a config record is constructed or loaded, before any
/// pipeline stage runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("options `{first}` and `{second}` are mutually exclusive")]
    MutuallyExclusive { first: String, second: String },

    #[error("invalid value for `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },
}

/// Errors raised by pipeline stages.
///
/// Configuration and bounds errors are fatal for the run. Per-cell failures
/// are reported as `InvalidSample` but collected into [`RunDiagnostics`]
/// by the calling stage rather than propagated.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A cell ended up with zero valid samples or failed bounds validation.
    #[error("invalid samples for cell {id}: {reason}")]
    InvalidSample { id: u32, reason: String },

    /// Coordinate indexing exceeded the image extents. Should only arise
    /// from a misconfigured bounding box, never from a correctly generated
    /// grid.
    #[error("coordinate ({x}, {y}, {z}) out of bounds for volume {bounds:?}")]
    OutOfBounds {
        x: i64,
        y: i64,
        z: i64,
        bounds: (usize, usize, usize),
    },

}

/// Per-cell signal that mesh/shape extraction was skipped because the region
/// had too few voxels for reliable reconstruction. Not an error: skipped
/// cells are recorded as missing in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionSkipped {
    pub id: u32,
    pub voxels: usize,
    pub minimum: usize,
}

impl std::fmt::Display for ReconstructionSkipped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell {} skipped: {} voxels below minimum {}",
            self.id, self.voxels, self.minimum
        )
    }
}

/// Collected per-cell failures for one run of a stage.
///
/// One cell's failure must not abort processing of the remaining cells, so
/// stages push into this and surface a summary once at the end.
#[derive(Debug, Default, Clone)]
pub struct RunDiagnostics {
    pub excluded: Vec<(u32, String)>,
    pub skipped: Vec<ReconstructionSkipped>,
}

impl RunDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(&mut self, id: u32, reason: impl Into<String>) {
        self.excluded.push((id, reason.into()));
    }

    pub fn skip(&mut self, skipped: ReconstructionSkipped) {
        self.skipped.push(skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty() && self.skipped.is_empty()
    }

    /// Logs a warn-level summary of all collected diagnostics.
    pub fn report(&self) {
        for (id, reason) in &self.excluded {
            log::warn!("Excluded cell {}: {}", id, reason);
        }
        for skipped in &self.skipped {
            log::warn!("{}", skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_formats_option_names() {
        let err = ConfigError::MutuallyExclusive {
            first: "include_ids".to_string(),
            second: "exclude_ids".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "options `include_ids` and `exclude_ids` are mutually exclusive"
        );
    }

    #[test]
    fn diagnostics_collects_without_aborting() {
        let mut diagnostics = RunDiagnostics::new();
        assert!(diagnostics.is_empty());

        diagnostics.exclude(3, "zero valid samples");
        diagnostics.skip(ReconstructionSkipped {
            id: 5,
            voxels: 1,
            minimum: 4,
        });

        assert_eq!(diagnostics.excluded.len(), 1);
        assert_eq!(diagnostics.skipped.len(), 1);
        assert!(!diagnostics.is_empty());
    }
}
