use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single occupied lattice point: one object id and its coordinates.
///
/// Coordinates are voxel indices (integral values) until the rescaling stage
/// multiplies them into physical units. An id of zero denotes background and
/// never appears in a sample set; biological entities have id >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(id: u32, x: f64, y: f64, z: f64) -> Self {
        Self { id, x, y, z }
    }
}

/// An ordered sequence of samples, one per occupied lattice point.
///
/// Many samples map to one id (a "cell"). Cells are derived views computed
/// on demand; they are never stored independently of their samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

/// Aggregate view over all samples sharing an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: u32,
    pub voxels: usize,
    pub centroid: [f64; 3],
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Cell {
    /// Height of the cell in z, in the sample set's current units.
    pub fn height(&self) -> f64 {
        self.max[2] - self.min[2]
    }
}

impl SampleSet {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Distinct ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.samples.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Groups samples by id, ascending.
    pub fn by_id(&self) -> BTreeMap<u32, Vec<Sample>> {
        let mut groups: BTreeMap<u32, Vec<Sample>> = BTreeMap::new();
        for sample in &self.samples {
            groups.entry(sample.id).or_default().push(*sample);
        }
        groups
    }

    /// Derived cell views, recomputed from the current samples.
    pub fn cells(&self) -> Vec<Cell> {
        self.by_id()
            .into_iter()
            .map(|(id, samples)| {
                let voxels = samples.len();
                let mut min = [f64::INFINITY; 3];
                let mut max = [f64::NEG_INFINITY; 3];
                let mut sum = [0.0; 3];
                for sample in &samples {
                    let coords = [sample.x, sample.y, sample.z];
                    for axis in 0..3 {
                        min[axis] = min[axis].min(coords[axis]);
                        max[axis] = max[axis].max(coords[axis]);
                        sum[axis] += coords[axis];
                    }
                }
                let centroid = [
                    sum[0] / voxels as f64,
                    sum[1] / voxels as f64,
                    sum[2] / voxels as f64,
                ];
                Cell {
                    id,
                    voxels,
                    centroid,
                    min,
                    max,
                }
            })
            .collect()
    }

    /// Keeps only samples whose id passes the predicate.
    pub fn retain_ids(&self, keep: impl Fn(u32) -> bool) -> SampleSet {
        SampleSet::new(
            self.samples
                .iter()
                .copied()
                .filter(|s| keep(s.id))
                .collect(),
        )
    }

    /// Minimum coordinate on each axis across all samples.
    pub fn minimums(&self) -> [f64; 3] {
        let mut mins = [f64::INFINITY; 3];
        for sample in &self.samples {
            mins[0] = mins[0].min(sample.x);
            mins[1] = mins[1].min(sample.y);
            mins[2] = mins[2].min(sample.z);
        }
        mins
    }

    /// Maximum coordinate on each axis across all samples.
    pub fn maximums(&self) -> [f64; 3] {
        let mut maxs = [f64::NEG_INFINITY; 3];
        for sample in &self.samples {
            maxs[0] = maxs[0].max(sample.x);
            maxs[1] = maxs[1].max(sample.y);
            maxs[2] = maxs[2].max(sample.z);
        }
        maxs
    }

    /// Step size between adjacent coordinate values on each axis.
    ///
    /// The step is the smallest positive difference between sorted unique
    /// coordinates. Axes with fewer than two distinct values report step 1.
    pub fn step_sizes(&self) -> [f64; 3] {
        [
            step_size(self.samples.iter().map(|s| s.x)),
            step_size(self.samples.iter().map(|s| s.y)),
            step_size(self.samples.iter().map(|s| s.z)),
        ]
    }
}

fn step_size(values: impl Iterator<Item = f64>) -> f64 {
    let mut unique: Vec<f64> = values.collect();
    unique.sort_by(|a, b| a.total_cmp(b));
    unique.dedup();

    let mut steps: Vec<f64> = unique.windows(2).map(|w| w[1] - w[0]).collect();
    steps.retain(|&s| s > 0.0);

    if steps.is_empty() {
        return 1.0;
    }

    let min = steps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = steps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() > 1e-9 {
        log::warn!("Variable step size between {} and {}; using {}", min, max, min);
    }
    min
}
