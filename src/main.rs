use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crop_instances::{ExtractionConfig, ExtractionSession};

#[derive(Parser, Debug)]
#[command(name = "crop-instances", version, about)]
struct Args {
    /// Data folder containing `processed/` labels and `raw/` tiles
    data_folder: PathBuf,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Label file to use instead of processed/<labels_dataset>/data.geojson
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Value replacing missing reflectance
    #[arg(long)]
    nan_fill: Option<f64>,

    /// Reject labelled pixels with a larger NaN fraction
    #[arg(long)]
    max_nan_ratio: Option<f64>,

    /// Do not append NDVI
    #[arg(long)]
    no_ndvi: bool,

    /// Append NDWI
    #[arg(long)]
    add_ndwi: bool,

    /// Skip normalizing statistics
    #[arg(long)]
    no_normalizing_dict: bool,

    /// Also sample this many unlabelled instances per tile
    #[arg(long)]
    autoencoder: Option<usize>,

    #[arg(long)]
    val_set_size: Option<f64>,

    #[arg(long)]
    test_set_size: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<(PathBuf, ExtractionConfig)> {
        let mut config = match &self.config {
            Some(path) => ExtractionConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => ExtractionConfig::default(),
        };

        if self.labels.is_some() {
            config.label_path = self.labels;
        }
        if let Some(v) = self.nan_fill {
            config.nan_fill = v;
        }
        if let Some(v) = self.max_nan_ratio {
            config.max_nan_ratio = Some(v);
        }
        if self.no_ndvi {
            config.add_ndvi = false;
        }
        if self.add_ndwi {
            config.add_ndwi = true;
        }
        if self.no_normalizing_dict {
            config.calculate_normalizing_dict = false;
        }
        if let Some(n) = self.autoencoder {
            config.return_autoencoder_instances = true;
            config.autoencoder_instances_per_label = n;
        }
        if let Some(v) = self.val_set_size {
            config.val_set_size = v;
        }
        if let Some(v) = self.test_set_size {
            config.test_set_size = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        Ok((self.data_folder, config))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let (data_folder, config) = Args::parse().into_config()?;
    log::debug!("{config:?}");

    let mut session = ExtractionSession::new(&data_folder, config)
        .context("starting extraction session")?;
    session.run()?;
    let summary = session.finish()?;

    for (split, count) in &summary.instances {
        println!("{split}: {count} instances");
    }
    for (reason, count) in &summary.skipped {
        println!("skipped ({reason}): {count}");
    }
    if !summary.failed_tiles.is_empty() {
        println!("{} tiles failed to load", summary.failed_tiles.len());
    }
    Ok(())
}
