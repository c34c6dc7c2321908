use pipeline_common::{ConfigError, ConnectivityMethod, PipelineError, ProcessConfig, Sample, SampleSet};
use std::collections::{HashMap, HashSet};

/// Sequential post-processing over a sample set.
///
/// Stage order is fixed: edge exclusion, then connectivity cleanup, then
/// include/exclude filters, then rescaling. The first two stages must run
/// while coordinates are still in voxel-index space; the filters and the
/// rescale commute. Every stage returns a new sample set and is idempotent.
pub fn process_samples(
    samples: &SampleSet,
    config: &ProcessConfig,
    bounds: (usize, usize, usize),
    scale_xy: f64,
    scale_z: f64,
) -> Result<SampleSet, PipelineError> {
    let mut processed = samples.clone();

    if config.edges {
        log::info!("Removing edge cells ...");
        processed = remove_edge_cells(&processed, bounds, config.edge_threshold);
    }

    if config.connected {
        log::info!("Removing unconnected regions ...");
        let threshold = config
            .connected_threshold
            .unwrap_or_else(|| default_connected_threshold(&processed, scale_xy, scale_z));
        processed = remove_unconnected_regions(
            &processed,
            config.connectivity,
            threshold,
            scale_xy,
            scale_z,
        );
    }

    if config.include_ids.is_some() || config.exclude_ids.is_some() {
        log::info!("Filtering cell ids ...");
        processed = filter_ids(
            &processed,
            config.include_ids.as_deref(),
            config.exclude_ids.as_deref(),
        )?;
    }

    if let Some(factor) = config.scale_factor {
        log::info!("Scaling coordinates ...");
        processed = scale_coordinates(&processed, scale_xy, scale_z, factor);
    }

    Ok(processed)
}

/// Removes cells whose samples touch the image boundary.
///
/// A cell is excluded when any of its samples lies within `threshold` voxels
/// of the lower or upper volume boundary on any axis.
pub fn remove_edge_cells(
    samples: &SampleSet,
    bounds: (usize, usize, usize),
    threshold: f64,
) -> SampleSet {
    let upper = [
        (bounds.0 as f64 - 1.0) - threshold,
        (bounds.1 as f64 - 1.0) - threshold,
        (bounds.2 as f64 - 1.0) - threshold,
    ];

    let mut edge_ids: HashSet<u32> = HashSet::new();
    for sample in samples.iter() {
        let coords = [sample.x, sample.y, sample.z];
        for axis in 0..3 {
            if coords[axis] <= threshold || coords[axis] >= upper[axis] {
                edge_ids.insert(sample.id);
                break;
            }
        }
    }

    if !edge_ids.is_empty() {
        log::debug!("Excluding {} edge cell(s)", edge_ids.len());
    }
    samples.retain_ids(|id| !edge_ids.contains(&id))
}

/// Default nearest-neighbor threshold: 1.5x the smallest physical grid
/// spacing, so directly adjacent lattice points always connect.
fn default_connected_threshold(samples: &SampleSet, scale_xy: f64, scale_z: f64) -> f64 {
    let steps = samples.step_sizes();
    let spacing = (steps[0] * scale_xy)
        .min(steps[1] * scale_xy)
        .min(steps[2] * scale_z);
    spacing * 1.5
}

/// Keeps only the single largest connected region per cell id.
pub fn remove_unconnected_regions(
    samples: &SampleSet,
    method: ConnectivityMethod,
    connected_threshold: f64,
    scale_xy: f64,
    scale_z: f64,
) -> SampleSet {
    let steps = samples.step_sizes();
    let mut kept = Vec::new();

    for (id, cell_samples) in samples.by_id() {
        let components = match method {
            ConnectivityMethod::Graph => graph_components(&cell_samples, steps),
            ConnectivityMethod::Distance => distance_components(
                &cell_samples,
                connected_threshold,
                scale_xy,
                scale_z,
            ),
        };

        if let Some(largest) = select_largest(&components) {
            if components.len() > 1 {
                log::debug!(
                    "Skipping {} unconnected region(s) for cell id {}",
                    components.len() - 1,
                    id
                );
            }
            kept.extend(largest.iter().map(|&index| cell_samples[index]));
        }
    }

    SampleSet::new(kept)
}

/// Connected components by 6-connectivity on step-normalized coordinates.
fn graph_components(samples: &[Sample], steps: [f64; 3]) -> Vec<Vec<usize>> {
    let voxel = |s: &Sample| -> (i64, i64, i64) {
        (
            (s.x / steps[0]).round() as i64,
            (s.y / steps[1]).round() as i64,
            (s.z / steps[2]).round() as i64,
        )
    };

    let mut index_of: HashMap<(i64, i64, i64), usize> = HashMap::new();
    for (index, sample) in samples.iter().enumerate() {
        index_of.insert(voxel(sample), index);
    }

    const OFFSETS: [(i64, i64, i64); 6] = [
        (-1, 0, 0),
        (1, 0, 0),
        (0, -1, 0),
        (0, 1, 0),
        (0, 0, -1),
        (0, 0, 1),
    ];

    let mut visited = vec![false; samples.len()];
    let mut components = Vec::new();

    for start in 0..samples.len() {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        visited[start] = true;

        while let Some(index) = stack.pop() {
            component.push(index);
            let (x, y, z) = voxel(&samples[index]);
            for (dx, dy, dz) in OFFSETS {
                if let Some(&neighbor) = index_of.get(&(x + dx, y + dy, z + dz)) {
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        stack.push(neighbor);
                    }
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Connected components by single-linkage under a physical distance
/// threshold (um).
fn distance_components(
    samples: &[Sample],
    threshold: f64,
    scale_xy: f64,
    scale_z: f64,
) -> Vec<Vec<usize>> {
    let positions: Vec<[f64; 3]> = samples
        .iter()
        .map(|s| [s.x * scale_xy, s.y * scale_xy, s.z * scale_z])
        .collect();
    let threshold_sq = threshold * threshold;

    let mut parent: Vec<usize> = (0..samples.len()).collect();

    fn find(parent: &mut Vec<usize>, index: usize) -> usize {
        let mut root = index;
        while parent[root] != root {
            root = parent[root];
        }
        let mut current = index;
        while parent[current] != root {
            let next = parent[current];
            parent[current] = root;
            current = next;
        }
        root
    }

    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            let dx = positions[i][0] - positions[j][0];
            let dy = positions[i][1] - positions[j][1];
            let dz = positions[i][2] - positions[j][2];
            if dx * dx + dy * dy + dz * dz <= threshold_sq {
                let root_i = find(&mut parent, i);
                let root_j = find(&mut parent, j);
                if root_i != root_j {
                    parent[root_i.max(root_j)] = root_i.min(root_j);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..positions.len() {
        let root = find(&mut parent, index);
        groups.entry(root).or_default().push(index);
    }

    let mut components: Vec<Vec<usize>> = groups.into_values().collect();
    for component in &mut components {
        component.sort_unstable();
    }
    components.sort_by_key(|component| component[0]);
    components
}

/// Largest component; ties resolve to the one containing the earliest
/// sample, which keeps the selection deterministic.
fn select_largest<'a>(components: &'a [Vec<usize>]) -> Option<&'a Vec<usize>> {
    components
        .iter()
        .max_by(|a, b| a.len().cmp(&b.len()).then(b[0].cmp(&a[0])))
}

/// Keeps only ids in the allow-list, or drops ids in the deny-list. The two
/// are mutually exclusive; config validation rejects the combination before
/// this runs, and this double-checks.
pub fn filter_ids(
    samples: &SampleSet,
    include: Option<&[u32]>,
    exclude: Option<&[u32]>,
) -> Result<SampleSet, ConfigError> {
    match (include, exclude) {
        (Some(_), Some(_)) => Err(ConfigError::MutuallyExclusive {
            first: "include_ids".to_string(),
            second: "exclude_ids".to_string(),
        }),
        (Some(include), None) => Ok(samples.retain_ids(|id| include.contains(&id))),
        (None, Some(exclude)) => Ok(samples.retain_ids(|id| !exclude.contains(&id))),
        (None, None) => Ok(samples.clone()),
    }
}

/// Rescales coordinates into physical units: x and y by `scale_xy * factor`,
/// z by `scale_z * factor`. The transform is linear and invertible.
pub fn scale_coordinates(
    samples: &SampleSet,
    scale_xy: f64,
    scale_z: f64,
    factor: f64,
) -> SampleSet {
    SampleSet::new(
        samples
            .iter()
            .map(|s| {
                Sample::new(
                    s.id,
                    s.x * scale_xy * factor,
                    s.y * scale_xy * factor,
                    s.z * scale_z * factor,
                )
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u32, x: f64, y: f64, z: f64) -> Sample {
        Sample::new(id, x, y, z)
    }

    #[test]
    fn cell_touching_x_boundary_is_excluded() {
        // One cell occupying voxel (0, 5, 5) in a 10x10x10 volume touches
        // the x = 0 boundary; with threshold 0 its id must disappear.
        let set = SampleSet::new(vec![
            sample(1, 0.0, 5.0, 5.0),
            sample(2, 4.0, 4.0, 4.0),
            sample(2, 5.0, 4.0, 4.0),
        ]);

        let cleaned = remove_edge_cells(&set, (10, 10, 10), 0.0);
        assert_eq!(cleaned.ids(), vec![2]);
    }

    #[test]
    fn any_axis_counts_as_edge() {
        let set = SampleSet::new(vec![
            sample(1, 5.0, 5.0, 9.0),
            sample(2, 5.0, 5.0, 5.0),
        ]);

        let cleaned = remove_edge_cells(&set, (10, 10, 10), 0.0);
        assert_eq!(cleaned.ids(), vec![2]);
    }

    #[test]
    fn edge_threshold_widens_the_border() {
        let set = SampleSet::new(vec![
            sample(1, 2.0, 5.0, 5.0),
            sample(2, 5.0, 5.0, 5.0),
        ]);

        assert_eq!(remove_edge_cells(&set, (10, 10, 10), 1.0).ids(), vec![1, 2]);
        assert_eq!(remove_edge_cells(&set, (10, 10, 10), 2.0).ids(), vec![2]);
    }

    #[test]
    fn graph_cleanup_keeps_largest_component() {
        // Cell 1: a 3-voxel run plus a detached voxel.
        let set = SampleSet::new(vec![
            sample(1, 0.0, 0.0, 0.0),
            sample(1, 1.0, 0.0, 0.0),
            sample(1, 2.0, 0.0, 0.0),
            sample(1, 7.0, 7.0, 0.0),
        ]);

        let cleaned = remove_unconnected_regions(
            &set,
            ConnectivityMethod::Graph,
            0.0,
            1.0,
            1.0,
        );
        assert_eq!(cleaned.len(), 3);
        assert!(cleaned.iter().all(|s| s.y == 0.0));
    }

    #[test]
    fn graph_cleanup_respects_step_size() {
        // Samples on a step-2 lattice are adjacent at distance 2.
        let set = SampleSet::new(vec![
            sample(1, 0.0, 0.0, 0.0),
            sample(1, 2.0, 0.0, 0.0),
            sample(1, 8.0, 0.0, 0.0),
        ]);

        let cleaned = remove_unconnected_regions(
            &set,
            ConnectivityMethod::Graph,
            0.0,
            1.0,
            1.0,
        );
        assert_eq!(cleaned.len(), 2);
    }

    #[test]
    fn connectivity_cleanup_is_idempotent() {
        let set = SampleSet::new(vec![
            sample(1, 0.0, 0.0, 0.0),
            sample(1, 1.0, 0.0, 0.0),
            sample(1, 5.0, 5.0, 5.0),
            sample(2, 3.0, 3.0, 3.0),
        ]);

        let once = remove_unconnected_regions(&set, ConnectivityMethod::Graph, 0.0, 1.0, 1.0);
        let twice = remove_unconnected_regions(&once, ConnectivityMethod::Graph, 0.0, 1.0, 1.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn distance_cleanup_links_within_threshold() {
        let set = SampleSet::new(vec![
            sample(1, 0.0, 0.0, 0.0),
            sample(1, 1.0, 0.0, 0.0),
            sample(1, 2.0, 0.0, 0.0),
            sample(1, 9.0, 0.0, 0.0),
        ]);

        let cleaned = remove_unconnected_regions(
            &set,
            ConnectivityMethod::Distance,
            1.5,
            1.0,
            1.0,
        );
        assert_eq!(cleaned.len(), 3);

        let again = remove_unconnected_regions(
            &cleaned,
            ConnectivityMethod::Distance,
            1.5,
            1.0,
            1.0,
        );
        assert_eq!(cleaned, again);
    }

    #[test]
    fn include_list_keeps_only_listed_ids() {
        let set = SampleSet::new(vec![
            sample(1, 0.0, 0.0, 0.0),
            sample(2, 1.0, 0.0, 0.0),
            sample(3, 2.0, 0.0, 0.0),
        ]);

        let kept = filter_ids(&set, Some(&[1, 3]), None).unwrap();
        assert_eq!(kept.ids(), vec![1, 3]);

        let dropped = filter_ids(&set, None, Some(&[1, 3])).unwrap();
        assert_eq!(dropped.ids(), vec![2]);
    }

    #[test]
    fn both_filters_set_is_a_config_error() {
        let set = SampleSet::new(vec![sample(1, 0.0, 0.0, 0.0)]);
        assert!(matches!(
            filter_ids(&set, Some(&[1]), Some(&[2])),
            Err(ConfigError::MutuallyExclusive { .. })
        ));
    }

    #[test]
    fn rescaling_round_trips() {
        let set = SampleSet::new(vec![
            sample(1, 3.0, 4.0, 5.0),
            sample(2, 7.0, 8.0, 9.0),
        ]);

        let scaled = scale_coordinates(&set, 0.108333, 0.29, 2.5);
        let restored = scale_coordinates(&scaled, 1.0 / 0.108333, 1.0 / 0.29, 1.0 / 2.5);

        for (original, round_tripped) in set.iter().zip(restored.iter()) {
            assert!((original.x - round_tripped.x).abs() < 1e-9);
            assert!((original.y - round_tripped.y).abs() < 1e-9);
            assert!((original.z - round_tripped.z).abs() < 1e-9);
        }
    }

    #[test]
    fn full_pipeline_runs_stages_in_order() {
        let config = ProcessConfig {
            edges: true,
            edge_threshold: 0.0,
            connected: true,
            connectivity: ConnectivityMethod::Graph,
            connected_threshold: None,
            scale_factor: Some(1.0),
            include_ids: None,
            exclude_ids: None,
        };

        let set = SampleSet::new(vec![
            // Touches x = 0: removed by edge exclusion.
            sample(1, 0.0, 5.0, 5.0),
            // Main component of cell 2 plus one stray voxel.
            sample(2, 4.0, 4.0, 4.0),
            sample(2, 5.0, 4.0, 4.0),
            sample(2, 8.0, 8.0, 8.0),
        ]);

        let processed = process_samples(&set, &config, (10, 10, 10), 0.5, 0.25).unwrap();
        assert_eq!(processed.ids(), vec![2]);
        assert_eq!(processed.len(), 2);
        // Scaled into physical units by the final stage.
        assert_eq!(processed.samples()[0].x, 2.0);
        assert_eq!(processed.samples()[0].z, 1.0);
    }
}
