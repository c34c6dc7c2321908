use nalgebra::Point3;
use pipeline_common::ReconstructionSkipped;
use std::collections::HashMap;

/// Surface reconstruction from simulation-output voxels.
///
/// Meshes are extracted from the binary occupancy field with a surface-nets
/// isosurface: one vertex per grid cell containing a sign change, placed at
/// the mean of the cell's edge crossings, with quads emitted across every
/// sign-change edge. The result is a closed triangle mesh in voxel
/// coordinates scaled by the physical voxel size.

/// A triangle mesh with shared vertices.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<[usize; 3]>,
}

impl SurfaceMesh {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Mean of all vertex positions.
    pub fn centroid(&self) -> Point3<f64> {
        let mut sum = [0.0; 3];
        for vertex in &self.vertices {
            sum[0] += vertex.x;
            sum[1] += vertex.y;
            sum[2] += vertex.z;
        }
        let n = self.vertices.len().max(1) as f64;
        Point3::new(sum[0] / n, sum[1] / n, sum[2] / n)
    }
}

/// Reconstructs a surface mesh for one cell region.
///
/// Regions with fewer than `minimum_voxels` voxels are skipped (recorded as
/// missing, not an error): too few voxels cannot support a reliable mesh.
pub fn reconstruct_mesh(
    id: u32,
    voxels: &[[i64; 3]],
    scale_xy: f64,
    scale_z: f64,
    minimum_voxels: usize,
) -> Result<SurfaceMesh, ReconstructionSkipped> {
    if voxels.len() < minimum_voxels {
        return Err(ReconstructionSkipped {
            id,
            voxels: voxels.len(),
            minimum: minimum_voxels,
        });
    }

    // Occupancy grid padded by one empty layer on every side so the surface
    // closes around voxels on the region boundary.
    let mut mins = [i64::MAX; 3];
    let mut maxs = [i64::MIN; 3];
    for voxel in voxels {
        for axis in 0..3 {
            mins[axis] = mins[axis].min(voxel[axis]);
            maxs[axis] = maxs[axis].max(voxel[axis]);
        }
    }
    let dims = [
        (maxs[0] - mins[0]) as usize + 3,
        (maxs[1] - mins[1]) as usize + 3,
        (maxs[2] - mins[2]) as usize + 3,
    ];

    let index = |x: usize, y: usize, z: usize| -> usize { (z * dims[1] + y) * dims[0] + x };
    let mut occupied = vec![false; dims[0] * dims[1] * dims[2]];
    for voxel in voxels {
        let x = (voxel[0] - mins[0]) as usize + 1;
        let y = (voxel[1] - mins[1]) as usize + 1;
        let z = (voxel[2] - mins[2]) as usize + 1;
        occupied[index(x, y, z)] = true;
    }
    let occ = |x: usize, y: usize, z: usize| -> bool { occupied[index(x, y, z)] };

    // One vertex per mixed cell, at the mean of its edge crossing midpoints.
    let mut vertex_of: HashMap<(usize, usize, usize), usize> = HashMap::new();
    let mut mesh = SurfaceMesh::default();

    const CORNERS: [(usize, usize, usize); 8] = [
        (0, 0, 0),
        (1, 0, 0),
        (0, 1, 0),
        (1, 1, 0),
        (0, 0, 1),
        (1, 0, 1),
        (0, 1, 1),
        (1, 1, 1),
    ];
    const EDGES: [(usize, usize); 12] = [
        (0, 1),
        (2, 3),
        (4, 5),
        (6, 7),
        (0, 2),
        (1, 3),
        (4, 6),
        (5, 7),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];

    for z in 0..dims[2] - 1 {
        for y in 0..dims[1] - 1 {
            for x in 0..dims[0] - 1 {
                let corners: Vec<bool> = CORNERS
                    .iter()
                    .map(|&(dx, dy, dz)| occ(x + dx, y + dy, z + dz))
                    .collect();
                if corners.iter().all(|&c| c) || corners.iter().all(|&c| !c) {
                    continue;
                }

                let mut sum = [0.0; 3];
                let mut crossings = 0;
                for &(a, b) in &EDGES {
                    if corners[a] != corners[b] {
                        let pa = CORNERS[a];
                        let pb = CORNERS[b];
                        sum[0] += x as f64 + (pa.0 + pb.0) as f64 / 2.0;
                        sum[1] += y as f64 + (pa.1 + pb.1) as f64 / 2.0;
                        sum[2] += z as f64 + (pa.2 + pb.2) as f64 / 2.0;
                        crossings += 1;
                    }
                }

                let n = crossings as f64;
                let vertex = Point3::new(
                    sum[0] / n * scale_xy,
                    sum[1] / n * scale_xy,
                    sum[2] / n * scale_z,
                );
                vertex_of.insert((x, y, z), mesh.vertices.len());
                mesh.vertices.push(vertex);
            }
        }
    }

    // Quads across every grid edge with a sign change, connecting the four
    // cells that share the edge; winding follows the crossing direction.
    // Occupied points sit strictly inside the padded grid, so perpendicular
    // coordinates start at 1 while the edge axis starts at 0.

    // Edges along x: adjacent cells differ in y and z.
    for z in 1..dims[2] - 1 {
        for y in 1..dims[1] - 1 {
            for x in 0..dims[0] - 1 {
                let inside = occ(x, y, z);
                if occ(x + 1, y, z) != inside {
                    emit_quad(
                        &mut mesh,
                        &vertex_of,
                        [(x, y - 1, z - 1), (x, y, z - 1), (x, y, z), (x, y - 1, z)],
                        inside,
                    );
                }
            }
        }
    }

    // Edges along y: adjacent cells differ in x and z.
    for z in 1..dims[2] - 1 {
        for y in 0..dims[1] - 1 {
            for x in 1..dims[0] - 1 {
                let inside = occ(x, y, z);
                if occ(x, y + 1, z) != inside {
                    emit_quad(
                        &mut mesh,
                        &vertex_of,
                        [(x - 1, y, z - 1), (x - 1, y, z), (x, y, z), (x, y, z - 1)],
                        inside,
                    );
                }
            }
        }
    }

    // Edges along z: adjacent cells differ in x and y.
    for z in 0..dims[2] - 1 {
        for y in 1..dims[1] - 1 {
            for x in 1..dims[0] - 1 {
                let inside = occ(x, y, z);
                if occ(x, y, z + 1) != inside {
                    emit_quad(
                        &mut mesh,
                        &vertex_of,
                        [(x - 1, y - 1, z), (x, y - 1, z), (x, y, z), (x - 1, y, z)],
                        inside,
                    );
                }
            }
        }
    }

    Ok(mesh)
}

fn emit_quad(
    mesh: &mut SurfaceMesh,
    vertex_of: &HashMap<(usize, usize, usize), usize>,
    cells: [(usize, usize, usize); 4],
    inside: bool,
) {
    let indices: Option<Vec<usize>> = cells
        .iter()
        .map(|cell| vertex_of.get(cell).copied())
        .collect();
    // Every adjacent cell of a sign-change edge is mixed, so all four
    // vertices exist for correctly built grids.
    let Some(quad) = indices else {
        return;
    };

    if inside {
        mesh.faces.push([quad[0], quad[1], quad[2]]);
        mesh.faces.push([quad[0], quad[2], quad[3]]);
    } else {
        mesh.faces.push([quad[0], quad[2], quad[1]]);
        mesh.faces.push([quad[0], quad[3], quad[2]]);
    }
}

/// Cross-section of a mesh along the plane z = `z_plane`: the unordered set
/// of 2D outline segments where triangles cross the plane.
pub fn slice_mesh(mesh: &SurfaceMesh, z_plane: f64) -> Vec<[[f64; 2]; 2]> {
    let mut segments = Vec::new();

    for face in &mesh.faces {
        let mut crossings: Vec<[f64; 2]> = Vec::new();
        for i in 0..3 {
            let a = mesh.vertices[face[i]];
            let b = mesh.vertices[face[(i + 1) % 3]];
            let da = a.z - z_plane;
            let db = b.z - z_plane;
            if (da < 0.0) != (db < 0.0) {
                let t = da / (da - db);
                crossings.push([a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)]);
            }
        }
        if crossings.len() == 2 {
            segments.push([crossings[0], crossings[1]]);
        }
    }

    segments
}
