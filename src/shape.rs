use crate::mesh::SurfaceMesh;
use nalgebra::{DMatrix, DVector};
use pipeline_common::PipelineError;

/// Spherical-harmonic shape descriptors.
///
/// A mesh surface is summarized by expanding its radius function around the
/// centroid in real spherical harmonics up to a fixed order and fitting the
/// coefficients by least squares over the mesh vertices. The ordered
/// coefficient vector is the shape descriptor used for downstream
/// dimensionality reduction.

/// Ordered spherical-harmonic coefficients for one cell surface.
#[derive(Debug, Clone)]
pub struct ShapeDescriptor {
    pub order: usize,
    pub coefficients: Vec<f64>,
}

/// Canonical coefficient column names: cosine terms `shcoeffs_L{l}M{m}C` for
/// m in 0..=l, then sine terms `shcoeffs_L{l}M{m}S` for m in 1..=l.
pub fn coefficient_names(order: usize) -> Vec<String> {
    let mut names = Vec::new();
    for l in 0..=order {
        for m in 0..=l {
            names.push(format!("shcoeffs_L{l}M{m}C"));
        }
    }
    for l in 0..=order {
        for m in 1..=l {
            names.push(format!("shcoeffs_L{l}M{m}S"));
        }
    }
    names
}

/// Number of coefficients for an expansion of the given order.
pub fn coefficient_count(order: usize) -> usize {
    let cosines = (order + 1) * (order + 2) / 2;
    let sines = cosines - (order + 1);
    cosines + sines
}

/// Fits the shape descriptor for a mesh.
///
/// Vertices are centered on the mesh centroid and converted to spherical
/// coordinates; the radius function is then projected onto the real
/// spherical-harmonic basis by an SVD least-squares solve.
pub fn shape_descriptor(
    id: u32,
    mesh: &SurfaceMesh,
    order: usize,
) -> Result<ShapeDescriptor, PipelineError> {
    let center = mesh.centroid();
    let count = coefficient_count(order);

    let mut radii = Vec::with_capacity(mesh.vertices.len());
    let mut rows = Vec::with_capacity(mesh.vertices.len());
    for vertex in &mesh.vertices {
        let dx = vertex.x - center.x;
        let dy = vertex.y - center.y;
        let dz = vertex.z - center.z;
        let radius = (dx * dx + dy * dy + dz * dz).sqrt();
        if radius == 0.0 {
            // A vertex on the centroid has no direction; it cannot
            // constrain the fit.
            continue;
        }
        let theta = (dz / radius).acos();
        let phi = dy.atan2(dx);
        radii.push(radius);
        rows.push(basis_row(theta, phi, order));
    }

    if radii.len() < 4 {
        return Err(PipelineError::InvalidSample {
            id,
            reason: format!("{} usable vertices cannot constrain a fit", radii.len()),
        });
    }

    let design = DMatrix::from_fn(radii.len(), count, |row, column| rows[row][column]);
    let observed = DVector::from_vec(radii);

    let svd = design.svd(true, true);
    let solution = svd
        .solve(&observed, 1e-10)
        .map_err(|reason| PipelineError::InvalidSample {
            id,
            reason: reason.to_string(),
        })?;

    Ok(ShapeDescriptor {
        order,
        coefficients: solution.iter().copied().collect(),
    })
}

/// One design-matrix row: every basis function evaluated at (theta, phi),
/// in the [`coefficient_names`] ordering.
fn basis_row(theta: f64, phi: f64, order: usize) -> Vec<f64> {
    let legendre = associated_legendre(order, theta.cos());
    let mut row = Vec::with_capacity(coefficient_count(order));

    for l in 0..=order {
        for m in 0..=l {
            row.push(normalization(l, m) * legendre[l][m] * (m as f64 * phi).cos());
        }
    }
    for l in 0..=order {
        for m in 1..=l {
            row.push(normalization(l, m) * legendre[l][m] * (m as f64 * phi).sin());
        }
    }
    row
}

/// Orthonormalization factor for the real spherical harmonics, with the
/// sqrt(2) fold for m > 0.
fn normalization(l: usize, m: usize) -> f64 {
    let mut ratio = 1.0;
    for k in (l - m + 1)..=(l + m) {
        ratio /= k as f64;
    }
    let factor = ((2 * l + 1) as f64 / (4.0 * std::f64::consts::PI) * ratio).sqrt();
    if m > 0 {
        std::f64::consts::SQRT_2 * factor
    } else {
        factor
    }
}

/// Associated Legendre values P_l^m(x) for all l, m up to `order`, by the
/// standard three-term recurrences (no Condon-Shortley phase).
fn associated_legendre(order: usize, x: f64) -> Vec<Vec<f64>> {
    let mut p = vec![vec![0.0; order + 1]; order + 1];
    p[0][0] = 1.0;

    let sine = (1.0 - x * x).max(0.0).sqrt();
    for m in 1..=order {
        p[m][m] = p[m - 1][m - 1] * (2 * m - 1) as f64 * sine;
    }
    for m in 0..order {
        p[m + 1][m] = x * (2 * m + 1) as f64 * p[m][m];
    }
    for m in 0..=order {
        for l in (m + 2)..=order {
            p[l][m] = ((2 * l - 1) as f64 * x * p[l - 1][m]
                - (l + m - 1) as f64 * p[l - 2][m])
                / (l - m) as f64;
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::reconstruct_mesh;
    use nalgebra::Point3;

    fn sphere_mesh(radius: f64) -> SurfaceMesh {
        let mut vertices = Vec::new();
        let rows = 24;
        let columns = 48;
        for i in 0..rows {
            let theta = (i as f64 + 0.5) / rows as f64 * std::f64::consts::PI;
            for j in 0..columns {
                let phi = j as f64 / columns as f64 * 2.0 * std::f64::consts::PI;
                vertices.push(Point3::new(
                    radius * theta.sin() * phi.cos(),
                    radius * theta.sin() * phi.sin(),
                    radius * theta.cos(),
                ));
            }
        }
        SurfaceMesh {
            vertices,
            faces: Vec::new(),
        }
    }

    #[test]
    fn names_match_coefficient_count() {
        for order in [1, 4, 16] {
            assert_eq!(coefficient_names(order).len(), coefficient_count(order));
        }
        assert_eq!(coefficient_names(1), vec![
            "shcoeffs_L0M0C",
            "shcoeffs_L1M0C",
            "shcoeffs_L1M1C",
            "shcoeffs_L1M1S",
        ]);
    }

    #[test]
    fn sphere_loads_only_the_monopole() {
        let descriptor = shape_descriptor(1, &sphere_mesh(5.0), 4).unwrap();

        // r(theta, phi) = R projects entirely onto Y00 = 1 / sqrt(4 pi).
        let expected = 5.0 * (4.0 * std::f64::consts::PI).sqrt();
        assert!((descriptor.coefficients[0] - expected).abs() < 1e-6);
        for &coefficient in &descriptor.coefficients[1..] {
            assert!(coefficient.abs() < 1e-6);
        }
    }

    #[test]
    fn descriptor_scales_linearly_with_radius() {
        let small = shape_descriptor(1, &sphere_mesh(2.0), 2).unwrap();
        let large = shape_descriptor(1, &sphere_mesh(4.0), 2).unwrap();
        assert!((large.coefficients[0] - 2.0 * small.coefficients[0]).abs() < 1e-6);
    }

    #[test]
    fn voxel_mesh_is_monopole_dominated() {
        let mut voxels = Vec::new();
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    voxels.push([x, y, z]);
                }
            }
        }
        let mesh = reconstruct_mesh(1, &voxels, 1.0, 1.0, 4).unwrap();
        let descriptor = shape_descriptor(1, &mesh, 4).unwrap();

        let monopole = descriptor.coefficients[0].abs();
        assert!(monopole > 0.0);
        for &coefficient in &descriptor.coefficients[1..] {
            assert!(coefficient.abs() < monopole);
        }
    }

    #[test]
    fn legendre_matches_known_values() {
        let p = associated_legendre(3, 0.5);
        assert!((p[1][0] - 0.5).abs() < 1e-12);
        // P_2^0(x) = (3x^2 - 1) / 2
        assert!((p[2][0] - (-0.125)).abs() < 1e-12);
        // P_1^1(x) = sqrt(1 - x^2), without the Condon-Shortley phase
        assert!((p[1][1] - 0.75_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn degenerate_meshes_are_invalid_samples() {
        let mesh = SurfaceMesh {
            vertices: vec![Point3::new(0.0, 0.0, 0.0); 3],
            faces: Vec::new(),
        };
        assert!(matches!(
            shape_descriptor(9, &mesh, 2),
            Err(PipelineError::InvalidSample { id: 9, .. })
        ));
    }
}
