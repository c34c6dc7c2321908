use ndarray::{Array3, Array4, ArrayView3};
use serde::{Deserialize, Serialize};

/// A dense labeled image volume with axes ordered (channel, z, y, x).
///
/// Voxel values are object ids; zero is background. The per-axis physical
/// scales record the voxel size in microns, which may differ between the
/// imaging plane and the z axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVolume {
    data: Array4<u32>,
    /// Voxel size in the imaging plane (um/voxel).
    pub scale_xy: f64,
    /// Voxel size along the z axis (um/voxel).
    pub scale_z: f64,
}

impl ImageVolume {
    pub fn new(data: Array4<u32>, scale_xy: f64, scale_z: f64) -> Self {
        Self {
            data,
            scale_xy,
            scale_z,
        }
    }

    /// Wraps a single-channel volume.
    pub fn from_channel(data: Array3<u32>, scale_xy: f64, scale_z: f64) -> Self {
        Self::new(data.insert_axis(ndarray::Axis(0)), scale_xy, scale_z)
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Image bounds in the x, y, and z directions.
    pub fn bounds(&self) -> (usize, usize, usize) {
        let (_, nz, ny, nx) = self.data.dim();
        (nx, ny, nz)
    }

    /// Read-only view of one label channel, indexed (z, y, x).
    ///
    /// Channel selection happens once here; all downstream indexing is
    /// channel-agnostic.
    pub fn channel(&self, channel: usize) -> Option<ArrayView3<'_, u32>> {
        if channel < self.channels() {
            Some(self.data.index_axis(ndarray::Axis(0), channel))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn bounds_are_x_y_z_ordered() {
        let volume = ImageVolume::from_channel(Array3::zeros((4, 5, 6)), 1.0, 2.0);
        assert_eq!(volume.bounds(), (6, 5, 4));
        assert_eq!(volume.channels(), 1);
    }

    #[test]
    fn channel_view_reads_labels() {
        let mut labels = Array3::zeros((2, 3, 3));
        labels[[1, 2, 0]] = 7;
        let volume = ImageVolume::from_channel(labels, 1.0, 1.0);

        let view = volume.channel(0).unwrap();
        assert_eq!(view[[1, 2, 0]], 7);
        assert_eq!(view[[0, 0, 0]], 0);
        assert!(volume.channel(1).is_none());
    }
}
