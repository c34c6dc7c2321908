use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;

// Define modules used by main
mod arcade;
mod grid;
mod mesh;
mod metrics;
mod process;
mod sampler;
mod shape;
mod voronoi;

use pipeline_common::keys::{channel_segment, make_full_key};
use pipeline_common::{store, PipelineConfig, RunDiagnostics};

#[derive(Parser)]
#[command(name = "cell-abm-pipeline", version, about = "Cell ABM initialization and analysis pipeline")]
struct Cli {
    /// Path to the pipeline configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample ids and coordinates from labeled image volumes.
    Sample,
    /// Post-process raw samples (edges, connectivity, filters, scaling).
    Process,
    /// Estimate cell boundaries with a Voronoi tessellation.
    Voronoi,
    /// Convert processed samples into ARCADE input formats.
    ConvertArcade,
    /// Reconstruct meshes and shape descriptors from simulation output.
    Reconstruct,
    /// Calculate colony metrics from simulation output.
    Metrics,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let cli = Cli::parse();

    // --- Load Configuration ---
    let config = PipelineConfig::load(&cli.config)?;
    info!("Loaded configuration for series '{}'", config.name);

    let start_time = Instant::now();
    match cli.command {
        Command::Sample => run_sample(&config)?,
        Command::Process => run_process(&config)?,
        Command::Voronoi => run_voronoi(&config)?,
        Command::ConvertArcade => run_convert_arcade(&config)?,
        Command::Reconstruct => run_reconstruct(&config)?,
        Command::Metrics => run_metrics(&config)?,
    }
    info!(
        "Finished in {:.3} seconds.",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn image_key(config: &PipelineConfig, key: &str) -> String {
    make_full_key(&config.name, "images", "", key, &["bin"])
}

fn raw_sample_key(config: &PipelineConfig, key: &str, channel: usize) -> String {
    make_full_key(
        &config.name,
        "samples",
        "RAW",
        &channel_segment(key, channel),
        &["RAW", "csv"],
    )
}

fn processed_sample_key(
    config: &PipelineConfig,
    key: &str,
    channel: usize,
    region: Option<&str>,
) -> String {
    let extensions: Vec<&str> = match region {
        Some(region) => vec!["PROCESSED", region, "csv"],
        None => vec!["PROCESSED", "csv"],
    };
    make_full_key(
        &config.name,
        "samples",
        "PROCESSED",
        &channel_segment(key, channel),
        &extensions,
    )
}

fn run_sample(config: &PipelineConfig) -> Result<()> {
    for key in &config.keys {
        info!("Sampling image for key '{}'", key);
        let volume = store::load_volume(&config.working, &image_key(config, key))?;

        let grid = grid::LatticeGrid::new(
            config.sample.grid,
            volume.bounds(),
            config.sample.resolution,
            volume.scale_xy,
            volume.scale_z,
            config.sample.margin,
        )?;

        for &channel in &config.sample.channels {
            let samples = sampler::sample_volume(&volume, channel, &grid)?;
            info!(
                "Sampled {} coordinates from channel {} of key '{}'",
                samples.len(),
                channel,
                key
            );
            store::save_samples(
                &config.working,
                &raw_sample_key(config, key, channel),
                &samples,
            )?;
        }
    }
    Ok(())
}

fn run_process(config: &PipelineConfig) -> Result<()> {
    for key in &config.keys {
        let volume = store::load_volume(&config.working, &image_key(config, key))?;
        let bounds = volume.bounds();

        for &channel in &config.sample.channels {
            info!("Processing samples for key '{}' channel {}", key, channel);
            let samples =
                store::load_samples(&config.working, &raw_sample_key(config, key, channel))?;

            let processed = process::process_samples(
                &samples,
                &config.process,
                bounds,
                config.scale_xy,
                config.scale_z,
            )?;
            let cells = processed.cells();
            info!(
                "Processed {} of {} samples ({} cells)",
                processed.len(),
                samples.len(),
                cells.len()
            );
            for cell in &cells {
                log::debug!(
                    "Cell {}: {} voxels, height {:.2}",
                    cell.id,
                    cell.voxels,
                    cell.height()
                );
            }

            store::save_samples(
                &config.working,
                &processed_sample_key(config, key, channel, None),
                &processed,
            )?;
        }
    }
    Ok(())
}

fn run_voronoi(config: &PipelineConfig) -> Result<()> {
    let Some(voronoi_config) = &config.voronoi else {
        anyhow::bail!("Missing [voronoi] section in configuration.");
    };

    for key in &config.keys {
        info!("Generating Voronoi tessellation for key '{}'", key);
        let volume = store::load_volume(&config.working, &image_key(config, key))?;
        let tessellation = voronoi::create_voronoi_volume(&volume, voronoi_config)?;

        let output_key = make_full_key(
            &config.name,
            "images",
            "",
            &format!(
                "{}_voronoi",
                channel_segment(key, voronoi_config.channel)
            ),
            &["bin"],
        );
        store::save_volume(&config.working, &output_key, &tessellation)?;
    }
    Ok(())
}

fn run_convert_arcade(config: &PipelineConfig) -> Result<()> {
    let reference_records: Vec<arcade::ReferenceRecord> = match &config.arcade.reference {
        Some(reference_key) => store::load_csv(&config.working, reference_key)?,
        None => Vec::new(),
    };

    for key in &config.keys {
        let reference = arcade::Reference::from_records(&reference_records, key);

        for &channel in &config.sample.channels {
            info!("Converting key '{}' channel {} to ARCADE formats", key, channel);
            let samples = store::load_samples(
                &config.working,
                &processed_sample_key(config, key, channel, None),
            )?;

            let region_samples = match &config.arcade.region {
                Some(region) => Some(store::load_samples(
                    &config.working,
                    &processed_sample_key(config, key, channel, Some(region)),
                )?),
                None => None,
            };
            let region = config
                .arcade
                .region
                .as_deref()
                .zip(region_samples.as_ref());

            let conversion =
                arcade::convert_arcade(&samples, region, config.arcade.margins, &reference)?;
            info!(
                "Converted {} cells ({} excluded)",
                conversion.cells.len(),
                conversion.diagnostics.excluded.len()
            );

            let segment = channel_segment(key, channel);
            store::save_text(
                &config.working,
                &make_full_key(&config.name, "converted", "ARCADE", &segment, &["xml"]),
                &conversion.setup.to_xml(),
            )?;
            store::save_json(
                &config.working,
                &make_full_key(
                    &config.name,
                    "converted",
                    "ARCADE",
                    &segment,
                    &["CELLS", "json"],
                ),
                &conversion.cells,
            )?;
            store::save_json(
                &config.working,
                &make_full_key(
                    &config.name,
                    "converted",
                    "ARCADE",
                    &segment,
                    &["LOCATIONS", "json"],
                ),
                &conversion.locations,
            )?;
        }
    }
    Ok(())
}

fn location_voxels(location: &arcade::LocationRecord) -> Vec<[i64; 3]> {
    location
        .location
        .iter()
        .flat_map(|region| region.voxels.iter().copied())
        .collect()
}

fn run_reconstruct(config: &PipelineConfig) -> Result<()> {
    let settings = &config.reconstruct;
    let names = shape::coefficient_names(settings.order);

    for key in &config.keys {
        info!("Reconstructing shapes for key '{}'", key);
        let locations: Vec<arcade::LocationRecord> = store::load_json(
            &config.working,
            &make_full_key(
                &config.name,
                "data",
                "LOCATIONS",
                key,
                &["LOCATIONS", "json"],
            ),
        )?;

        let mut writer = store::csv_writer(
            &config.working,
            &make_full_key(&config.name, "analysis", "SH", key, &["SH", "csv"]),
        )?;
        let mut header = vec!["key".to_string(), "id".to_string(), "voxels".to_string()];
        header.extend(names.iter().cloned());
        writer.write_record(&header)?;

        let mut diagnostics = RunDiagnostics::new();
        let mut slices: Vec<(usize, Vec<[[f64; 2]; 2]>)> = Vec::new();

        for location in &locations {
            let voxels = location_voxels(location);
            let mesh = match mesh::reconstruct_mesh(
                location.id as u32,
                &voxels,
                config.scale_xy,
                config.scale_z,
                settings.minimum_voxels,
            ) {
                Ok(mesh) => mesh,
                Err(skipped) => {
                    // Too few voxels for a reliable mesh: record and move on.
                    diagnostics.skip(skipped);
                    continue;
                }
            };

            let descriptor = match shape::shape_descriptor(
                location.id as u32,
                &mesh,
                settings.order,
            ) {
                Ok(descriptor) => descriptor,
                Err(error) => {
                    warn!("Cell {}: {}", location.id, error);
                    diagnostics.exclude(location.id as u32, error.to_string());
                    continue;
                }
            };

            let mut record = vec![
                key.to_string(),
                location.id.to_string(),
                voxels.len().to_string(),
            ];
            record.extend(
                descriptor
                    .coefficients
                    .iter()
                    .map(|value| format!("{:.6}", value)),
            );
            writer.write_record(&record)?;

            if settings.slice_meshes {
                let outline = mesh::slice_mesh(&mesh, mesh.centroid().z);
                slices.push((location.id, outline));
            }
        }
        writer.flush()?;

        if settings.slice_meshes {
            store::save_json(
                &config.working,
                &make_full_key(&config.name, "analysis", "SLICE", key, &["SLICE", "json"]),
                &slices,
            )?;
        }

        diagnostics.report();
        info!(
            "Reconstructed {} of {} cells for key '{}'",
            locations.len() - diagnostics.skipped.len() - diagnostics.excluded.len(),
            locations.len(),
            key
        );
    }
    Ok(())
}

fn run_metrics(config: &PipelineConfig) -> Result<()> {
    for key in &config.keys {
        info!("Calculating colony metrics for key '{}'", key);
        let locations: Vec<arcade::LocationRecord> = store::load_json(
            &config.working,
            &make_full_key(
                &config.name,
                "data",
                "LOCATIONS",
                key,
                &["LOCATIONS", "json"],
            ),
        )?;

        let centers: Vec<(usize, [f64; 3])> = locations
            .iter()
            .map(|location| {
                (
                    location.id,
                    [
                        location.center[0] as f64 * config.scale_xy,
                        location.center[1] as f64 * config.scale_xy,
                        location.center[2] as f64 * config.scale_z,
                    ],
                )
            })
            .collect();

        let cell_metrics = metrics::neighbor_metrics(&centers, config.metrics.cutoff);
        match metrics::summarize(&cell_metrics) {
            Some(summary) => info!(
                "{} cells: nearest neighbor {:.2} um (mean), {:.2} neighbors (mean)",
                summary.cells, summary.mean_nearest_distance, summary.mean_neighbors
            ),
            None => warn!("Fewer than two cells for key '{}'; no metrics computed", key),
        }

        store::save_csv(
            &config.working,
            &make_full_key(&config.name, "analysis", "METRICS", key, &["METRICS", "csv"]),
            &cell_metrics,
        )?;
    }
    Ok(())
}
