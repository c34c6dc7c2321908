use crate::sample::{Sample, SampleSet};
use crate::volume::ImageVolume;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Load/save collaborator for a local working location.
///
/// Payloads are addressed by pre-resolved keys (see [`crate::keys`]); the
/// store only joins them onto its root and picks the codec: CSV for tabular
/// data, JSON for structured records, bincode for dense volumes.

fn resolve(working: &str, key: &str) -> PathBuf {
    Path::new(working).join(key)
}

fn prepare(working: &str, key: &str) -> Result<PathBuf> {
    let path = resolve(working, key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create folders for '{}'", path.display()))?;
    }
    Ok(path)
}

/// Saves serializable records as CSV with a header row.
pub fn save_csv<T: Serialize>(working: &str, key: &str, records: &[T]) -> Result<()> {
    let path = prepare(working, key)?;
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads CSV records into deserializable structs.
pub fn load_csv<T: DeserializeOwned>(working: &str, key: &str) -> Result<Vec<T>> {
    let path = resolve(working, key);
    let mut reader = csv::Reader::from_path(&path)
        .with_context(|| format!("Failed to open CSV file '{}'", path.display()))?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

/// Saves a sample set to its tabular interchange form (columns id, x, y, z).
pub fn save_samples(working: &str, key: &str, samples: &SampleSet) -> Result<()> {
    save_csv(working, key, samples.samples())
}

/// Loads a sample set from its tabular interchange form.
pub fn load_samples(working: &str, key: &str) -> Result<SampleSet> {
    let records: Vec<Sample> = load_csv(working, key)?;
    Ok(SampleSet::new(records))
}

/// Opens a CSV writer for row-by-row output with a custom header.
pub fn csv_writer(working: &str, key: &str) -> Result<csv::Writer<File>> {
    let path = prepare(working, key)?;
    csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create CSV file '{}'", path.display()))
}

/// Saves a value as JSON.
pub fn save_json<T: Serialize>(working: &str, key: &str, value: &T) -> Result<()> {
    let path = prepare(working, key)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to create JSON file '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

/// Loads a JSON value.
pub fn load_json<T: DeserializeOwned>(working: &str, key: &str) -> Result<T> {
    let path = resolve(working, key);
    let file = File::open(&path)
        .with_context(|| format!("Failed to open JSON file '{}'", path.display()))?;
    Ok(serde_json::from_reader(file)?)
}

/// Saves plain text (e.g. the setup descriptor document).
pub fn save_text(working: &str, key: &str, body: &str) -> Result<()> {
    let path = prepare(working, key)?;
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

/// Saves an image volume in its dense binary form.
pub fn save_volume(working: &str, key: &str, volume: &ImageVolume) -> Result<()> {
    let path = prepare(working, key)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to create volume file '{}'", path.display()))?;
    bincode::serialize_into(file, volume)?;
    Ok(())
}

/// Loads an image volume from its dense binary form.
pub fn load_volume(working: &str, key: &str) -> Result<ImageVolume> {
    let path = resolve(working, key);
    let file = File::open(&path)
        .with_context(|| format!("Failed to open volume file '{}'", path.display()))?;
    Ok(bincode::deserialize_from(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use ndarray::Array3;

    fn temp_working(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("pipeline-store-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn samples_round_trip_through_csv() {
        let working = temp_working("samples");
        let samples = SampleSet::new(vec![
            Sample::new(1, 0.0, 2.0, 4.0),
            Sample::new(2, 1.0, 3.0, 5.0),
        ]);

        save_samples(&working, "series/samples/series_A1.RAW.csv", &samples).unwrap();
        let loaded = load_samples(&working, "series/samples/series_A1.RAW.csv").unwrap();

        assert_eq!(loaded, samples);
    }

    #[test]
    fn volumes_round_trip_through_bincode() {
        let working = temp_working("volume");
        let mut labels = Array3::zeros((2, 3, 3));
        labels[[0, 1, 2]] = 9;
        let volume = ImageVolume::from_channel(labels, 0.1, 0.3);

        save_volume(&working, "series/images/series_A1.bin", &volume).unwrap();
        let loaded = load_volume(&working, "series/images/series_A1.bin").unwrap();

        assert_eq!(loaded.bounds(), (3, 3, 2));
        assert_eq!(loaded.channel(0).unwrap()[[0, 1, 2]], 9);
        assert_eq!(loaded.scale_z, 0.3);
    }
}
