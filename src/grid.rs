use pipeline_common::{ConfigError, GridKind};

/// Lattice of candidate sample coordinates over a bounding volume.
///
/// The lattice is a lazy, restartable sequence: [`LatticeGrid::points`]
/// returns a fresh iterator each call, and offsets are a deterministic
/// function of (row, layer) index so re-running sampling reproduces the
/// exact same coordinates.
///
/// Ordering is x fastest, then y, then z, and is stable across runs;
/// consumers must not depend on any other property of the order.
#[derive(Debug, Clone)]
pub struct LatticeGrid {
    kind: GridKind,
    /// Image bounds in the x, y, and z directions (voxels).
    bounds: (usize, usize, usize),
    /// In-plane step between samples (voxels).
    xy_step: usize,
    /// Step between z layers (voxels).
    z_step: usize,
    /// Margin excluded at the upper image boundaries (voxels).
    margin: usize,
}

impl LatticeGrid {
    /// Derives lattice steps from the sampling resolution (um) and the
    /// per-axis voxel scales (um/voxel). The xy and z steps may differ
    /// because voxel size is anisotropic.
    pub fn new(
        kind: GridKind,
        bounds: (usize, usize, usize),
        resolution: f64,
        scale_xy: f64,
        scale_z: f64,
        margin: usize,
    ) -> Result<Self, ConfigError> {
        let xy_step = (resolution / scale_xy).round() as usize;
        let z_step = (resolution / scale_z).round() as usize;

        if xy_step == 0 || z_step == 0 {
            return Err(ConfigError::InvalidOption {
                option: "sample.resolution".to_string(),
                reason: format!(
                    "resolution {} um is below the voxel scale; steps must be at least one voxel",
                    resolution
                ),
            });
        }

        Ok(Self {
            kind,
            bounds,
            xy_step,
            z_step,
            margin,
        })
    }

    pub fn xy_step(&self) -> usize {
        self.xy_step
    }

    pub fn z_step(&self) -> usize {
        self.z_step
    }

    /// Starts a fresh pass over the lattice coordinates.
    pub fn points(&self) -> GridPoints {
        let (x_bound, y_bound, z_bound) = self.bounds;
        let limits = [
            x_bound.saturating_sub(self.margin) as f64,
            y_bound.saturating_sub(self.margin) as f64,
            z_bound.saturating_sub(self.margin) as f64,
        ];
        let empty = limits.iter().any(|&b| b <= 0.0);
        match self.kind {
            GridKind::Rect => GridPoints::Rect(RectPoints {
                limits,
                xy_step: self.xy_step as f64,
                z_step: self.z_step as f64,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                done: empty,
            }),
            GridKind::Hex => GridPoints::Hex(HexPoints {
                limits,
                xy_step: self.xy_step as f64,
                z_step: self.z_step as f64,
                col: 0,
                row: 0,
                layer: 0,
                done: empty,
            }),
        }
    }
}

/// Iterator over lattice coordinates for either grid kind.
pub enum GridPoints {
    Rect(RectPoints),
    Hex(HexPoints),
}

impl Iterator for GridPoints {
    type Item = [f64; 3];

    fn next(&mut self) -> Option<[f64; 3]> {
        match self {
            GridPoints::Rect(points) => points.next(),
            GridPoints::Hex(points) => points.next(),
        }
    }
}

/// Axis-aligned rectangular lattice: integer multiples of the step sizes.
pub struct RectPoints {
    limits: [f64; 3],
    xy_step: f64,
    z_step: f64,
    x: f64,
    y: f64,
    z: f64,
    done: bool,
}

impl Iterator for RectPoints {
    type Item = [f64; 3];

    fn next(&mut self) -> Option<[f64; 3]> {
        if self.done {
            return None;
        }
        let point = [self.x, self.y, self.z];

        // Advance x fastest, then y, then z.
        self.x += self.xy_step;
        if self.x >= self.limits[0] {
            self.x = 0.0;
            self.y += self.xy_step;
            if self.y >= self.limits[1] {
                self.y = 0.0;
                self.z += self.z_step;
                if self.z >= self.limits[2] {
                    self.done = true;
                }
            }
        }
        Some(point)
    }
}

/// Hexagonal close-packed lattice.
///
/// In-plane, rows form a triangular packing with pitch `xy_step * sqrt(3)/2`
/// and odd rows offset by exactly half the step. Layers stack in the
/// face-centered-cubic A-B-C pattern (period 3): layer phase 0 carries no
/// offset, phase 1 shifts by (step/2, step*sqrt(3)/6), phase 2 by
/// (0, step*sqrt(3)/3).
pub struct HexPoints {
    limits: [f64; 3],
    xy_step: f64,
    z_step: f64,
    col: usize,
    row: usize,
    layer: usize,
    done: bool,
}

impl HexPoints {
    fn row_pitch(&self) -> f64 {
        self.xy_step * 3.0_f64.sqrt() / 2.0
    }

    fn layer_offsets(&self) -> (f64, f64) {
        match self.layer % 3 {
            1 => (self.xy_step / 2.0, self.xy_step * 3.0_f64.sqrt() / 6.0),
            2 => (0.0, self.xy_step * 3.0_f64.sqrt() / 3.0),
            _ => (0.0, 0.0),
        }
    }
}

impl Iterator for HexPoints {
    type Item = [f64; 3];

    fn next(&mut self) -> Option<[f64; 3]> {
        loop {
            if self.done {
                return None;
            }

            let z = self.layer as f64 * self.z_step;
            if z >= self.limits[2] {
                self.done = true;
                return None;
            }

            let (x_offset, y_offset) = self.layer_offsets();
            let y = self.row as f64 * self.row_pitch() + y_offset;
            if y.round() >= self.limits[1] {
                // Row outside the bounds: move to the next layer.
                self.row = 0;
                self.col = 0;
                self.layer += 1;
                continue;
            }

            let row_offset = if self.row % 2 == 1 {
                self.xy_step / 2.0
            } else {
                0.0
            };
            let x = self.col as f64 * self.xy_step + row_offset + x_offset;
            if x.round() >= self.limits[0] {
                // Column outside the bounds: move to the next row.
                self.col = 0;
                self.row += 1;
                continue;
            }

            self.col += 1;
            return Some([x, y, z]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_grid(bounds: (usize, usize, usize), resolution: f64) -> LatticeGrid {
        LatticeGrid::new(GridKind::Rect, bounds, resolution, 1.0, 1.0, 0).unwrap()
    }

    fn hex_grid(bounds: (usize, usize, usize), resolution: f64) -> LatticeGrid {
        LatticeGrid::new(GridKind::Hex, bounds, resolution, 1.0, 1.0, 0).unwrap()
    }

    #[test]
    fn rect_spacing_is_exact_on_each_axis() {
        let grid = rect_grid((1000, 7, 9), 3.0);
        let points: Vec<[f64; 3]> = grid.points().collect();

        let mut xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        xs.dedup();
        for pair in xs.windows(2) {
            // No drift, even across an arbitrarily long axis.
            assert_eq!(pair[1] - pair[0], 3.0);
        }

        let mut zs: Vec<f64> = points.iter().map(|p| p[2]).collect();
        zs.sort_by(|a, b| a.total_cmp(b));
        zs.dedup();
        assert_eq!(zs, vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn rect_anisotropic_steps_differ() {
        let grid = LatticeGrid::new(GridKind::Rect, (10, 10, 10), 1.0, 0.5, 0.25, 0).unwrap();
        assert_eq!(grid.xy_step(), 2);
        assert_eq!(grid.z_step(), 4);
    }

    #[test]
    fn rect_ordering_is_x_then_y_then_z() {
        let grid = rect_grid((3, 3, 2), 1.0);
        let points: Vec<[f64; 3]> = grid.points().collect();
        assert_eq!(points[0], [0.0, 0.0, 0.0]);
        assert_eq!(points[1], [1.0, 0.0, 0.0]);
        assert_eq!(points[3], [0.0, 1.0, 0.0]);
        assert_eq!(points[9], [0.0, 0.0, 1.0]);
        assert_eq!(points.len(), 18);
    }

    #[test]
    fn points_iterator_is_restartable() {
        let grid = hex_grid((20, 20, 6), 2.0);
        let first: Vec<[f64; 3]> = grid.points().collect();
        let second: Vec<[f64; 3]> = grid.points().collect();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn hex_rows_alternate_by_half_step() {
        let grid = hex_grid((40, 40, 1), 4.0);
        let points: Vec<[f64; 3]> = grid.points().collect();

        let pitch = 4.0 * 3.0_f64.sqrt() / 2.0;
        let row0_min = points
            .iter()
            .filter(|p| p[1] == 0.0)
            .map(|p| p[0])
            .fold(f64::INFINITY, f64::min);
        let row1_min = points
            .iter()
            .filter(|p| (p[1] - pitch).abs() < 1e-9)
            .map(|p| p[0])
            .fold(f64::INFINITY, f64::min);

        assert_eq!(row0_min, 0.0);
        assert_eq!(row1_min, 2.0);
    }

    #[test]
    fn hex_layer_offsets_repeat_with_period_three() {
        let grid = hex_grid((40, 40, 40), 4.0);
        let points: Vec<[f64; 3]> = grid.points().collect();

        let layer_origin = |z: f64| -> ([f64; 2], bool) {
            let layer: Vec<&[f64; 3]> = points.iter().filter(|p| p[2] == z).collect();
            let min_x = layer.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
            let min_y = layer.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min);
            ([min_x, min_y], !layer.is_empty())
        };

        // Phases 0..3 differ, then the pattern repeats: layer k matches k+3.
        for (z, z_next) in [(0.0, 12.0), (4.0, 16.0), (8.0, 20.0)] {
            let (origin, present) = layer_origin(z);
            let (origin_next, present_next) = layer_origin(z_next);
            assert!(present && present_next);
            assert!((origin[0] - origin_next[0]).abs() < 1e-9);
            assert!((origin[1] - origin_next[1]).abs() < 1e-9);
        }

        let (a, _) = layer_origin(0.0);
        let (b, _) = layer_origin(4.0);
        let (c, _) = layer_origin(8.0);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn margin_excludes_boundary_coordinates() {
        let grid = LatticeGrid::new(GridKind::Rect, (10, 10, 4), 1.0, 1.0, 1.0, 2).unwrap();
        let mut count = 0;
        for point in grid.points() {
            assert!(point[0] < 8.0);
            assert!(point[1] < 8.0);
            count += 1;
        }
        assert_eq!(count, 8 * 8 * 2);
    }

    #[test]
    fn sub_voxel_resolution_is_rejected() {
        let result = LatticeGrid::new(GridKind::Rect, (10, 10, 10), 0.1, 1.0, 1.0, 0);
        assert!(result.is_err());
    }
}
