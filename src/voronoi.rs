use ndarray::{Array3, ArrayView3};
use pipeline_common::{ConfigError, ImageVolume, PipelineError, VoronoiConfig};

/// Voronoi boundary estimation for sparse or incomplete labeled volumes.
///
/// The labeled foreground (typically a nuclear segmentation) is dilated into
/// a boundary mask that estimates the plausible cell extent, then every
/// unlabeled voxel inside the mask is assigned to its nearest labeled seed
/// by an in-plane Voronoi partition, slice by slice.

/// Runs boundary estimation for the configured channel of a volume and
/// returns a new single-channel volume with the same scales.
pub fn create_voronoi_volume(
    volume: &ImageVolume,
    config: &VoronoiConfig,
) -> Result<ImageVolume, PipelineError> {
    let labels = volume.channel(config.channel).ok_or_else(|| {
        ConfigError::InvalidOption {
            option: "voronoi.channel".to_string(),
            reason: format!(
                "channel {} not present in image with {} channels",
                config.channel,
                volume.channels()
            ),
        }
    })?;

    let estimated = estimate_boundaries(labels, config.iterations, config.target_height);
    Ok(ImageVolume::from_channel(
        estimated,
        volume.scale_xy,
        volume.scale_z,
    ))
}

/// Estimates object boundaries in a labeled volume.
///
/// The result has the same shape and dtype as the input: voxels inside the
/// dilated mask take the id of their nearest in-plane seed, voxels outside
/// keep their original values, and background outside the mask stays zero.
pub fn estimate_boundaries(
    labels: ArrayView3<'_, u32>,
    iterations: u32,
    target_height: usize,
) -> Array3<u32> {
    let mask = create_boundary_mask(labels, iterations);
    let mut result = labels.to_owned();

    let Some((z_start, z_end)) = mask_height_range(&mask, target_height) else {
        return result;
    };

    for z in z_start..=z_end {
        partition_slice(labels, &mask, &mut result, z);
    }

    result
}

/// Builds the boundary mask: non-zero labels grown by `iterations` rounds of
/// 6-connected dilation. Volume edges clamp; the mask never wraps.
pub fn create_boundary_mask(labels: ArrayView3<'_, u32>, iterations: u32) -> Array3<bool> {
    let (nz, ny, nx) = labels.dim();
    let mut mask = Array3::from_shape_fn((nz, ny, nx), |index| labels[index] != 0);

    const OFFSETS: [(i64, i64, i64); 6] = [
        (-1, 0, 0),
        (1, 0, 0),
        (0, -1, 0),
        (0, 1, 0),
        (0, 0, -1),
        (0, 0, 1),
    ];

    for _ in 0..iterations {
        let previous = mask.clone();
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    if previous[[z, y, x]] {
                        continue;
                    }
                    let grown = OFFSETS.iter().any(|&(dz, dy, dx)| {
                        let nz_i = z as i64 + dz;
                        let ny_i = y as i64 + dy;
                        let nx_i = x as i64 + dx;
                        nz_i >= 0
                            && ny_i >= 0
                            && nx_i >= 0
                            && (nz_i as usize) < nz
                            && (ny_i as usize) < ny
                            && (nx_i as usize) < nx
                            && previous[[nz_i as usize, ny_i as usize, nx_i as usize]]
                    });
                    if grown {
                        mask[[z, y, x]] = true;
                    }
                }
            }
        }
    }

    mask
}

/// Z extent of the mask, clamped to `target_height` slices centered on the
/// extent. Returns None when the mask is empty.
fn mask_height_range(mask: &Array3<bool>, target_height: usize) -> Option<(usize, usize)> {
    let (nz, ny, nx) = mask.dim();

    let mut z_min = None;
    let mut z_max = None;
    for z in 0..nz {
        let occupied = (0..ny).any(|y| (0..nx).any(|x| mask[[z, y, x]]));
        if occupied {
            z_min.get_or_insert(z);
            z_max = Some(z);
        }
    }

    let (mut start, mut end) = (z_min?, z_max?);
    let height = end - start + 1;
    if height > target_height {
        let excess = height - target_height;
        start += excess / 2;
        end = start + target_height - 1;
    }
    Some((start, end))
}

/// Assigns every masked, unlabeled voxel of one z slice to its nearest seed
/// by in-plane Euclidean distance. Slices with zero seeds are left entirely
/// unlabeled. Equidistant voxels resolve to the lowest numeric id.
fn partition_slice(
    labels: ArrayView3<'_, u32>,
    mask: &Array3<bool>,
    result: &mut Array3<u32>,
    z: usize,
) {
    let (_, ny, nx) = labels.dim();

    let mut seeds: Vec<(i64, i64, u32)> = Vec::new();
    let mut y_range = (ny, 0);
    let mut x_range = (nx, 0);
    for y in 0..ny {
        for x in 0..nx {
            if labels[[z, y, x]] != 0 {
                seeds.push((y as i64, x as i64, labels[[z, y, x]]));
            }
            if mask[[z, y, x]] {
                y_range = (y_range.0.min(y), y_range.1.max(y));
                x_range = (x_range.0.min(x), x_range.1.max(x));
            }
        }
    }

    if seeds.is_empty() || y_range.0 > y_range.1 {
        return;
    }

    for y in y_range.0..=y_range.1 {
        for x in x_range.0..=x_range.1 {
            if !mask[[z, y, x]] || labels[[z, y, x]] != 0 {
                continue;
            }

            let mut best: Option<(i64, u32)> = None;
            for &(sy, sx, id) in &seeds {
                let dy = sy - y as i64;
                let dx = sx - x as i64;
                let distance = dy * dy + dx * dx;
                best = match best {
                    None => Some((distance, id)),
                    Some((best_distance, best_id)) => {
                        if distance < best_distance
                            || (distance == best_distance && id < best_id)
                        {
                            Some((distance, id))
                        } else {
                            Some((best_distance, best_id))
                        }
                    }
                };
            }

            if let Some((_, id)) = best {
                result[[z, y, x]] = id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn mask_dilation_grows_a_diamond() {
        // A single seed dilated twice grows into a 6-connected diamond:
        // radius 2 in its own slice, radius 1 one slice away.
        let mut labels = Array3::zeros((3, 5, 5));
        labels[[1, 2, 2]] = 2;

        let mask = create_boundary_mask(labels.view(), 2);

        assert!(mask[[1, 2, 2]]);
        assert!(mask[[1, 2, 0]]);
        assert!(mask[[1, 0, 2]]);
        assert!(mask[[1, 1, 1]]);
        assert!(!mask[[1, 0, 0]]);
        assert!(mask[[0, 2, 2]]);
        assert!(mask[[0, 1, 2]]);
        assert!(!mask[[0, 0, 2]]);
        assert!(!mask[[0, 1, 1]]);
        assert!(mask[[2, 2, 3]]);
    }

    #[test]
    fn dilation_clamps_at_volume_edges() {
        let mut labels = Array3::zeros((1, 3, 3));
        labels[[0, 0, 0]] = 1;

        let mask = create_boundary_mask(labels.view(), 5);
        // Everything reachable is filled; nothing panics or wraps.
        assert!(mask.iter().all(|&m| m));
    }

    #[test]
    fn masked_voxels_take_the_nearest_seed() {
        let mut labels = Array3::zeros((1, 10, 10));
        labels[[0, 2, 2]] = 2;
        labels[[0, 8, 8]] = 3;

        let result = estimate_boundaries(labels.view(), 1, 1);

        // Neighbors of each seed belong to that seed.
        assert_eq!(result[[0, 2, 3]], 2);
        assert_eq!(result[[0, 8, 7]], 3);
        // Seeds keep their own labels.
        assert_eq!(result[[0, 2, 2]], 2);
        assert_eq!(result[[0, 8, 8]], 3);
        // Unmasked voxels stay background.
        assert_eq!(result[[0, 0, 9]], 0);
    }

    #[test]
    fn equidistant_voxels_resolve_to_the_lowest_id() {
        let mut labels = Array3::zeros((1, 10, 10));
        labels[[0, 2, 2]] = 3;
        labels[[0, 8, 8]] = 2;

        // Dilate far enough that the midpoint is inside the mask.
        let result = estimate_boundaries(labels.view(), 6, 1);

        // (5, 5) is exactly equidistant from both seeds.
        assert_eq!(result[[0, 5, 5]], 2);
    }

    #[test]
    fn slices_without_seeds_stay_unlabeled() {
        let mut labels = Array3::zeros((2, 5, 5));
        labels[[0, 2, 2]] = 4;

        let result = estimate_boundaries(labels.view(), 1, 2);

        // The mask reaches into slice 1, but that slice has no seeds.
        let mask = create_boundary_mask(labels.view(), 1);
        assert!(mask[[1, 2, 2]]);
        assert!(result.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0));
        // The seeded slice is partitioned.
        assert_eq!(result[[0, 2, 3]], 4);
    }

    #[test]
    fn target_height_clamps_the_output_extent() {
        let mut labels = Array3::zeros((9, 5, 5));
        for z in 0..9 {
            labels[[z, 2, 2]] = 1;
        }

        let result = estimate_boundaries(labels.view(), 1, 3);

        // Only the central three slices are partitioned.
        assert_eq!(result[[4, 2, 3]], 1);
        assert_eq!(result[[3, 2, 3]], 1);
        assert_eq!(result[[5, 2, 3]], 1);
        assert_eq!(result[[0, 2, 3]], 0);
        assert_eq!(result[[8, 2, 3]], 0);
        // Original labels are preserved everywhere.
        assert_eq!(result[[0, 2, 2]], 1);
    }

    #[test]
    fn output_preserves_shape() {
        let labels = Array3::zeros((4, 6, 8));
        let result = estimate_boundaries(labels.view(), 3, 2);
        assert_eq!(result.dim(), (4, 6, 8));
        assert!(result.iter().all(|&v| v == 0));
    }
}
