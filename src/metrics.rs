use serde::Serialize;

/// Colony organization metrics over cell center positions: distance to the
/// nearest neighboring cell and number of neighbors within a cutoff radius.

/// Per-cell neighbor metrics for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct CellNeighborMetrics {
    pub id: usize,
    pub nearest_distance: f64,
    pub neighbors: usize,
}

/// Frame-level summary of the per-cell metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ColonySummary {
    pub cells: usize,
    pub mean_nearest_distance: f64,
    pub min_nearest_distance: f64,
    pub max_nearest_distance: f64,
    pub mean_neighbors: f64,
}

/// Computes nearest-neighbor distance and neighbor count for every center.
///
/// Self-distances are masked out; a frame with fewer than two cells yields
/// no metrics because no cell has a neighbor to measure against.
pub fn neighbor_metrics(centers: &[(usize, [f64; 3])], cutoff: f64) -> Vec<CellNeighborMetrics> {
    if centers.len() < 2 {
        return Vec::new();
    }

    let cutoff_sq = cutoff * cutoff;
    centers
        .iter()
        .map(|(id, position)| {
            let mut nearest_sq = f64::INFINITY;
            let mut neighbors = 0;
            for (other_id, other) in centers {
                if other_id == id {
                    continue;
                }
                let dx = position[0] - other[0];
                let dy = position[1] - other[1];
                let dz = position[2] - other[2];
                let distance_sq = dx * dx + dy * dy + dz * dz;
                nearest_sq = nearest_sq.min(distance_sq);
                if distance_sq <= cutoff_sq {
                    neighbors += 1;
                }
            }
            CellNeighborMetrics {
                id: *id,
                nearest_distance: nearest_sq.sqrt(),
                neighbors,
            }
        })
        .collect()
}

/// Summarizes per-cell metrics for one frame.
pub fn summarize(metrics: &[CellNeighborMetrics]) -> Option<ColonySummary> {
    if metrics.is_empty() {
        return None;
    }

    let count = metrics.len() as f64;
    let distances: Vec<f64> = metrics.iter().map(|m| m.nearest_distance).collect();
    Some(ColonySummary {
        cells: metrics.len(),
        mean_nearest_distance: distances.iter().sum::<f64>() / count,
        min_nearest_distance: distances.iter().copied().fold(f64::INFINITY, f64::min),
        max_nearest_distance: distances.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_neighbors: metrics.iter().map(|m| m.neighbors as f64).sum::<f64>() / count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_distance_masks_self() {
        let centers = vec![
            (1, [0.0, 0.0, 0.0]),
            (2, [3.0, 4.0, 0.0]),
            (3, [10.0, 0.0, 0.0]),
        ];

        let metrics = neighbor_metrics(&centers, 6.0);
        assert_eq!(metrics[0].id, 1);
        assert_eq!(metrics[0].nearest_distance, 5.0);
        assert_eq!(metrics[0].neighbors, 1);
        assert_eq!(metrics[2].nearest_distance, (49.0_f64 + 16.0).sqrt());
    }

    #[test]
    fn singleton_frames_yield_no_metrics() {
        let centers = vec![(1, [0.0, 0.0, 0.0])];
        assert!(neighbor_metrics(&centers, 10.0).is_empty());
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn summary_aggregates_distances_and_counts() {
        let centers = vec![
            (1, [0.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
            (3, [5.0, 0.0, 0.0]),
        ];

        let metrics = neighbor_metrics(&centers, 1.5);
        let summary = summarize(&metrics).unwrap();
        assert_eq!(summary.cells, 3);
        assert_eq!(summary.min_nearest_distance, 1.0);
        assert_eq!(summary.max_nearest_distance, 4.0);
        assert!((summary.mean_nearest_distance - 2.0).abs() < 1e-12);
        // Cells 1 and 2 are mutual neighbors; cell 3 has none in range.
        assert!((summary.mean_neighbors - 2.0 / 3.0).abs() < 1e-12);
    }
}
