use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crop_instances::ExtractionConfig;
use crop_instances::engineer::indices::BandLayout;

/// Write a small synthetic data folder: a GeoJSON label table and a set of
/// parquet tiles with seasonal reflectance curves and cloud gaps.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Data folder to create
    #[arg(default_value = "sample_data")]
    output: PathBuf,

    #[arg(long, default_value_t = 6)]
    tiles: usize,

    /// Cells per tile side
    #[arg(long, default_value_t = 8)]
    size: usize,

    #[arg(long, default_value_t = 12)]
    timesteps: usize,

    /// Fraction of observations blanked out as cloud
    #[arg(long, default_value_t = 0.05)]
    cloud: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const CELL_DEG: f64 = 0.0001;
const CROPS: [Option<&str>; 4] = [Some("maize"), Some("cassava"), None, Some("tea")];

/// Box-Muller transform for a normal draw.
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

/// Reflectance of one band at one timestep, with a green-up peak halfway
/// through the season that raises NIR and lowers red.
fn reflectance(band: usize, t: usize, timesteps: usize, vigour: f64, rng: &mut StdRng) -> f64 {
    let layout = BandLayout::default();
    let phase = t as f64 / timesteps.max(1) as f64;
    let season = (std::f64::consts::PI * phase).sin() * vigour;
    let base = 0.05 + 0.01 * band as f64;
    let signal = if band == layout.nir {
        base + 0.35 * season
    } else if band == layout.red {
        (base - 0.04 * season).max(0.01)
    } else {
        base + 0.05 * season
    };
    (signal + gauss(rng, 0.0, 0.005)).max(0.0)
}

fn write_tile(
    path: &Path,
    origin: (f64, f64),
    args: &Args,
    vigour: f64,
    rng: &mut StdRng,
) -> Result<()> {
    let n_bands = BandLayout::SENTINEL2_BANDS.len();
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut values = ListBuilder::new(Float64Builder::new());

    for xi in 0..args.size {
        for yi in 0..args.size {
            xs.push(origin.0 + xi as f64 * CELL_DEG);
            ys.push(origin.1 - yi as f64 * CELL_DEG);
            let cell_vigour = vigour * (0.8 + 0.4 * rng.gen::<f64>());
            for t in 0..args.timesteps {
                let cloudy = rng.gen::<f64>() < args.cloud;
                for band in 0..n_bands {
                    if cloudy {
                        values.values().append_null();
                    } else {
                        let v = reflectance(band, t, args.timesteps, cell_vigour, rng);
                        values.values().append_value(v);
                    }
                }
            }
            values.append(true);
        }
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Float64, false),
        Field::new(
            "values",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Float64Array::from(xs)),
            Arc::new(Float64Array::from(ys)),
            Arc::new(values.finish()),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let config = ExtractionConfig::default();

    let labels_path = config.label_file(&args.output);
    let tiles_dir = config.tiles_dir(&args.output);
    std::fs::create_dir_all(tiles_dir.as_path()).context("creating tiles directory")?;
    if let Some(parent) = labels_path.parent() {
        std::fs::create_dir_all(parent).context("creating labels directory")?;
    }

    let span = args.size as f64 * CELL_DEG;
    let mut features = Vec::new();
    for tile in 0..args.tiles {
        // tiles laid out west to east along the equator in western Kenya
        let origin = (34.5 + tile as f64 * span * 2.0, 0.5);
        let crop = CROPS[tile % CROPS.len()];

        // the last tile gets no label so it only feeds autoencoder sampling
        if tile + 1 < args.tiles {
            let lon = origin.0 + rng.gen::<f64>() * (span - CELL_DEG);
            let lat = origin.1 - rng.gen::<f64>() * (span - CELL_DEG);
            features.push(json!({
                "type": "Feature",
                "properties": { "lat": lat, "lon": lon, "crop_type": crop },
                "geometry": { "type": "Point", "coordinates": [lon, lat] }
            }));
        }

        let vigour = match crop {
            Some("tea") => 0.9,
            Some("maize") => 0.7,
            Some(_) => 0.5,
            None => 0.3,
        };
        let path = tiles_dir.join(format!("tile_{tile:03}.parquet"));
        write_tile(&path, origin, &args, vigour, &mut rng)?;
        log::info!("wrote {}", path.display());
    }

    let n_labels = features.len();
    let collection = json!({ "type": "FeatureCollection", "features": features });
    std::fs::write(&labels_path, serde_json::to_string_pretty(&collection)?)
        .with_context(|| format!("writing {}", labels_path.display()))?;

    println!(
        "Wrote {} tiles ({}x{} cells, {} timesteps) and {} labels to {}",
        args.tiles,
        args.size,
        args.size,
        args.timesteps,
        n_labels,
        args.output.display()
    );
    Ok(())
}
