use crate::grid::LatticeGrid;
use pipeline_common::{ConfigError, ImageVolume, PipelineError, Sample, SampleSet};

/// Samples object ids from a labeled volume at lattice coordinates.
///
/// Each candidate coordinate is rounded to an integer voxel index and looked
/// up in the selected channel; non-zero labels become samples, background is
/// dropped. Channel selection happens once, so sampling is invariant to the
/// number of channels in the image.
pub fn sample_volume(
    volume: &ImageVolume,
    channel: usize,
    grid: &LatticeGrid,
) -> Result<SampleSet, PipelineError> {
    let labels = volume.channel(channel).ok_or_else(|| {
        ConfigError::InvalidOption {
            option: "sample.channels".to_string(),
            reason: format!(
                "channel {} not present in image with {} channels",
                channel,
                volume.channels()
            ),
        }
    })?;

    let bounds = volume.bounds();
    let mut samples = SampleSet::default();

    for [x, y, z] in grid.points() {
        let xi = x.round() as i64;
        let yi = y.round() as i64;
        let zi = z.round() as i64;

        // Generation already restricts coordinates to the image bounds; an
        // index outside the array shape means the bounding box was
        // misconfigured.
        if xi < 0
            || yi < 0
            || zi < 0
            || xi as usize >= bounds.0
            || yi as usize >= bounds.1
            || zi as usize >= bounds.2
        {
            return Err(PipelineError::OutOfBounds {
                x: xi,
                y: yi,
                z: zi,
                bounds,
            });
        }

        let id = labels[[zi as usize, yi as usize, xi as usize]];
        if id > 0 {
            samples.push(Sample::new(id, xi as f64, yi as f64, zi as f64));
        }
    }

    log::debug!(
        "Sampled {} occupied coordinates from channel {}",
        samples.len(),
        channel
    );
    Ok(samples)
}
