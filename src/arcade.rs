use pipeline_common::{PipelineError, RunDiagnostics, SampleSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Conversion of processed samples into ARCADE input formats: the setup
/// document plus per-cell CELLS and LOCATIONS records.

/// Default region key for voxels not assigned to a labeled sub-region.
pub const DEFAULT_REGION: &str = "DEFAULT";

// Default Potts Hamiltonian terms for the setup document.
const POTTS_TERMS: [&str; 6] = [
    "volume",
    "surface",
    "adhesion",
    "height",
    "substrate",
    "persistence",
];

/// Population statistics for one region: means and standard deviations of
/// the measured and critical distributions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PopulationStats {
    pub volume_avg: f64,
    pub volume_std: f64,
    pub height_avg: f64,
    pub height_std: f64,
    pub critical_volume_avg: f64,
    pub critical_volume_std: f64,
    pub critical_height_avg: f64,
    pub critical_height_std: f64,
}

impl Default for PopulationStats {
    fn default() -> Self {
        // Default hiPSC population distributions (um^3 and um).
        Self {
            volume_avg: 1865.0,
            volume_std: 517.0,
            height_avg: 9.75,
            height_std: 2.4,
            critical_volume_avg: 1300.0,
            critical_volume_std: 200.0,
            critical_height_avg: 9.0,
            critical_height_std: 2.0,
        }
    }
}

/// Reference distribution row as loaded from the tabular statistics file,
/// keyed by condition and region. Fields mirror [`PopulationStats`]; the
/// CSV codec cannot deserialize nested records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub key: String,
    pub region: String,
    pub volume_avg: f64,
    pub volume_std: f64,
    pub height_avg: f64,
    pub height_std: f64,
    pub critical_volume_avg: f64,
    pub critical_volume_std: f64,
    pub critical_height_avg: f64,
    pub critical_height_std: f64,
}

impl ReferenceRecord {
    fn stats(&self) -> PopulationStats {
        PopulationStats {
            volume_avg: self.volume_avg,
            volume_std: self.volume_std,
            height_avg: self.height_avg,
            height_std: self.height_std,
            critical_volume_avg: self.critical_volume_avg,
            critical_volume_std: self.critical_volume_std,
            critical_height_avg: self.critical_height_avg,
            critical_height_std: self.critical_height_std,
        }
    }
}

/// Reference statistics by region for one condition key.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    regions: HashMap<String, PopulationStats>,
}

impl Reference {
    pub fn from_records(records: &[ReferenceRecord], key: &str) -> Self {
        let regions = records
            .iter()
            .filter(|record| record.key == key)
            .map(|record| (record.region.clone(), record.stats()))
            .collect();
        Self { regions }
    }

    /// Stats for a region, falling back to the built-in defaults.
    pub fn stats(&self, region: &str) -> PopulationStats {
        self.regions.get(region).copied().unwrap_or_default()
    }
}

/// Monotonic piecewise-linear map built from a measured distribution and its
/// critical counterpart: breakpoints at `(avg + k*std, crit_avg + k*crit_std)`
/// for k in -3..=3. Values between breakpoints interpolate linearly; values
/// outside the range clamp to the nearest endpoint.
#[derive(Debug, Clone)]
pub struct Breakpoints {
    points: Vec<(f64, f64)>,
}

impl Breakpoints {
    pub fn from_distribution(avg: f64, std: f64, critical_avg: f64, critical_std: f64) -> Self {
        let points = (-3..=3)
            .map(|k| {
                let k = k as f64;
                (avg + k * std, critical_avg + k * critical_std)
            })
            .collect();
        Self { points }
    }

    /// Interpolated value: exact at breakpoints, clamped outside the range.
    pub fn interpolate(&self, x: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, f0) = pair[0];
            let (x1, f1) = pair[1];
            if x <= x1 {
                let t = (x - x0) / (x1 - x0);
                return f0 + t * (f1 - f0);
            }
        }
        last.1
    }
}

// Monotonic thresholds between cell states, as fractions of critical volume.
const STATE_THRESHOLDS: [(&str, f64); 6] = [
    ("APOPTOTIC_LATE", 0.25),
    ("APOPTOTIC_EARLY", 0.90),
    ("PROLIFERATIVE_G1", 1.124),
    ("PROLIFERATIVE_S", 1.726),
    ("PROLIFERATIVE_G2", 1.969),
    ("PROLIFERATIVE_M", 2.0),
];

/// Cell state for a volume: the first state whose threshold fraction of the
/// critical volume exceeds the cell volume, or the last state otherwise.
pub fn assign_state(volume: f64, critical_volume: f64) -> &'static str {
    STATE_THRESHOLDS
        .iter()
        .find(|(_, fraction)| fraction * critical_volume > volume)
        .map(|(state, _)| *state)
        .unwrap_or(STATE_THRESHOLDS[STATE_THRESHOLDS.len() - 1].0)
}

/// Per-region entry of a CELLS record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRegionRecord {
    pub region: String,
    pub voxels: usize,
    pub criticals: [f64; 2],
}

/// One record of the CELLS file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: usize,
    pub parent: usize,
    pub pop: usize,
    pub age: usize,
    pub divisions: usize,
    pub state: String,
    pub phase: String,
    pub voxels: usize,
    pub criticals: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<CellRegionRecord>>,
}

/// Per-region voxel list of a LOCATIONS record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRegionRecord {
    pub region: String,
    pub voxels: Vec<[i64; 3]>,
}

/// One record of the LOCATIONS file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: usize,
    pub center: [i64; 3],
    pub location: Vec<LocationRegionRecord>,
}

/// Setup descriptor consumed by the simulator. Created once per conversion
/// run and immutable thereafter.
#[derive(Debug, Clone)]
pub struct Setup {
    pub init: usize,
    pub bounds: (i64, i64, i64),
    pub regions: Option<Vec<String>>,
}

impl Setup {
    /// Renders the setup document.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<set>\n");
        xml.push_str(&format!(
            "    <series name=\"ARCADE\" interval=\"1\" start=\"0\" end=\"0\" dt=\"1\" ds=\"1\" \
             ticks=\"1\" length=\"{}\" width=\"{}\" height=\"{}\">\n",
            self.bounds.0, self.bounds.1, self.bounds.2
        ));
        xml.push_str("        <potts>\n");
        for term in POTTS_TERMS {
            xml.push_str(&format!("            <potts.term id=\"{term}\" />\n"));
        }
        xml.push_str("        </potts>\n");
        xml.push_str("        <agents>\n");
        xml.push_str("            <populations>\n");
        match &self.regions {
            Some(regions) => {
                xml.push_str(&format!(
                    "                <population id=\"X\" init=\"{}\">\n",
                    self.init
                ));
                for region in regions {
                    xml.push_str(&format!(
                        "                    <population.region id=\"{region}\" />\n"
                    ));
                }
                xml.push_str("                </population>\n");
            }
            None => {
                xml.push_str(&format!(
                    "                <population id=\"X\" init=\"{}\" />\n",
                    self.init
                ));
            }
        }
        xml.push_str("            </populations>\n");
        xml.push_str("        </agents>\n");
        xml.push_str("    </series>\n");
        xml.push_str("</set>\n");
        xml
    }
}

/// Complete output of one conversion run.
#[derive(Debug, Clone)]
pub struct ArcadeConversion {
    pub setup: Setup,
    pub cells: Vec<CellRecord>,
    pub locations: Vec<LocationRecord>,
    pub diagnostics: RunDiagnostics,
}

/// Transforms samples into voxel coordinates centered for the simulator:
/// coordinates divide by the per-axis step sizes and shift so minima land at
/// `margin + 1`. The reference set (when given) supplies the steps and
/// minima, so region samples transform consistently with the full set.
pub fn transform_sample_voxels(
    samples: &SampleSet,
    margins: (i64, i64, i64),
    reference: Option<&SampleSet>,
) -> Vec<(u32, [i64; 3])> {
    let reference = reference.unwrap_or(samples);
    let steps = reference.step_sizes();
    let minimums = reference.minimums();
    let margins = [margins.0, margins.1, margins.2];

    samples
        .iter()
        .map(|sample| {
            let coords = [sample.x, sample.y, sample.z];
            let mut voxel = [0i64; 3];
            for axis in 0..3 {
                let offset = -(minimums[axis] / steps[axis]) + margins[axis] as f64 + 1.0;
                voxel[axis] = (coords[axis] / steps[axis] + offset).round() as i64;
            }
            (sample.id, voxel)
        })
        .collect()
}

/// Transformed sample bounds including margins, matching the voxel
/// transform's coordinate frame with one voxel of padding on each side.
pub fn calculate_sample_bounds(samples: &SampleSet, margins: (i64, i64, i64)) -> (i64, i64, i64) {
    let steps = samples.step_sizes();
    let minimums = samples.minimums();
    let maximums = samples.maximums();
    let margins = [margins.0, margins.1, margins.2];

    let mut bounds = [0i64; 3];
    for axis in 0..3 {
        let extent = (maximums[axis] - minimums[axis]) / steps[axis];
        bounds[axis] = extent.round() as i64 + 2 * margins[axis] + 3;
    }
    (bounds[0], bounds[1], bounds[2])
}

/// Converts processed samples into the ARCADE formats.
///
/// Region samples, when given, restrict each cell's voxels to labeled
/// sub-regions; a cell lacking the requested region is excluded with a
/// warning-level diagnostic. A cell whose transformed voxels fail bounds
/// validation is recorded as an invalid sample. Neither aborts the
/// conversion of the remaining cells.
pub fn convert_arcade(
    samples: &SampleSet,
    region: Option<(&str, &SampleSet)>,
    margins: (i64, i64, i64),
    reference: &Reference,
) -> Result<ArcadeConversion, PipelineError> {
    let voxels = transform_sample_voxels(samples, margins, None);

    // Tag voxels belonging to the labeled sub-region.
    let region_name = region.map(|(name, _)| name.to_string());
    let region_voxels: HashMap<(u32, [i64; 3]), ()> = match region {
        Some((_, region_samples)) => {
            transform_sample_voxels(region_samples, margins, Some(samples))
                .into_iter()
                .map(|(id, voxel)| ((id, voxel), ()))
                .collect()
        }
        None => HashMap::new(),
    };

    let mut grouped: BTreeMap<u32, Vec<([i64; 3], bool)>> = BTreeMap::new();
    for (id, voxel) in voxels {
        let in_region = region_voxels.contains_key(&(id, voxel));
        grouped.entry(id).or_default().push((voxel, in_region));
    }

    let mut diagnostics = RunDiagnostics::new();
    let mut cells = Vec::new();
    let mut locations = Vec::new();
    let mut rank = 0;

    for (id, cell_voxels) in &grouped {
        if cell_voxels.is_empty() {
            diagnostics.exclude(*id, "zero valid samples");
            continue;
        }
        if cell_voxels.iter().any(|(voxel, _)| voxel.iter().any(|&v| v < 0)) {
            // Bounds validation: the transform must never produce negative
            // voxel indices for samples inside the reference extent.
            diagnostics.exclude(*id, "samples outside transformed bounds");
            continue;
        }
        if let Some(name) = &region_name {
            if !cell_voxels.iter().any(|(_, in_region)| *in_region) {
                diagnostics.exclude(*id, format!("missing region {name}"));
                continue;
            }
        }

        rank += 1;
        cells.push(convert_to_cell(rank, cell_voxels, region_name.as_deref(), reference));
        locations.push(convert_to_location(rank, cell_voxels, region_name.as_deref()));
    }

    let setup = Setup {
        init: cells.len(),
        bounds: calculate_sample_bounds(samples, margins),
        regions: region_name
            .as_deref()
            .map(|name| vec![DEFAULT_REGION.to_string(), name.to_string()]),
    };

    diagnostics.report();
    Ok(ArcadeConversion {
        setup,
        cells,
        locations,
        diagnostics,
    })
}

fn criticals_for(voxels: &[([i64; 3], bool)], stats: &PopulationStats) -> [f64; 2] {
    let volume = voxels.len() as f64;
    let z_min = voxels.iter().map(|(v, _)| v[2]).min().unwrap_or(0);
    let z_max = voxels.iter().map(|(v, _)| v[2]).max().unwrap_or(0);
    let height = (z_max - z_min) as f64;

    let volume_map = Breakpoints::from_distribution(
        stats.volume_avg,
        stats.volume_std,
        stats.critical_volume_avg,
        stats.critical_volume_std,
    );
    let height_map = Breakpoints::from_distribution(
        stats.height_avg,
        stats.height_std,
        stats.critical_height_avg,
        stats.critical_height_std,
    );

    [volume_map.interpolate(volume), height_map.interpolate(height)]
}

fn convert_to_cell(
    rank: usize,
    voxels: &[([i64; 3], bool)],
    region: Option<&str>,
    reference: &Reference,
) -> CellRecord {
    let volume = voxels.len();
    let criticals = criticals_for(voxels, &reference.stats(DEFAULT_REGION));

    let state = assign_state(volume as f64, criticals[0]);
    let phase = state.to_string();
    let state_prefix = state.split('_').next().unwrap_or(state).to_string();

    let regions = region.map(|name| {
        let region_voxels: Vec<([i64; 3], bool)> = voxels
            .iter()
            .copied()
            .filter(|(_, in_region)| *in_region)
            .collect();
        let default_voxels: Vec<([i64; 3], bool)> = voxels
            .iter()
            .copied()
            .filter(|(_, in_region)| !*in_region)
            .collect();
        vec![
            CellRegionRecord {
                region: DEFAULT_REGION.to_string(),
                voxels: default_voxels.len(),
                criticals: criticals_for(&default_voxels, &reference.stats(DEFAULT_REGION)),
            },
            CellRegionRecord {
                region: name.to_string(),
                voxels: region_voxels.len(),
                criticals: criticals_for(&region_voxels, &reference.stats(name)),
            },
        ]
    });

    CellRecord {
        id: rank,
        parent: 0,
        pop: 1,
        age: 0,
        divisions: 0,
        state: state_prefix,
        phase,
        voxels: volume,
        criticals,
        regions,
    }
}

fn convert_to_location(
    rank: usize,
    voxels: &[([i64; 3], bool)],
    region: Option<&str>,
) -> LocationRecord {
    let count = voxels.len() as f64;
    let mut center = [0i64; 3];
    for axis in 0..3 {
        let mean: f64 = voxels.iter().map(|(v, _)| v[axis] as f64).sum::<f64>() / count;
        center[axis] = mean as i64;
    }

    let location = match region {
        Some(name) => vec![
            LocationRegionRecord {
                region: DEFAULT_REGION.to_string(),
                voxels: voxels
                    .iter()
                    .filter(|(_, in_region)| !*in_region)
                    .map(|(v, _)| *v)
                    .collect(),
            },
            LocationRegionRecord {
                region: name.to_string(),
                voxels: voxels
                    .iter()
                    .filter(|(_, in_region)| *in_region)
                    .map(|(v, _)| *v)
                    .collect(),
            },
        ],
        None => vec![LocationRegionRecord {
            region: "UNDEFINED".to_string(),
            voxels: voxels.iter().map(|(v, _)| *v).collect(),
        }],
    };

    LocationRecord {
        id: rank,
        center,
        location,
    }
}
