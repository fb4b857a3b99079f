use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::ExtractionConfig;
use crate::data::loader::{FileRasterLoader, RasterLoader, load_labels};
use crate::data::model::{LabelTable, RasterTimeSeries};
use crate::engineer::normalize::NormalizingDicts;
use crate::engineer::{ClassIndex, SkipReason, TileOptions, TileOutput, TileStats, process_tile};
use crate::error::{ExtractError, Result};

pub const CLASSES_FILE: &str = "classes_to_index.json";
pub const NORMALIZING_FILE: &str = "normalizing_dict.json";

// ---------------------------------------------------------------------------
// Dataset splits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// Directory name under the save directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "training",
            Split::Val => "validation",
            Split::Test => "testing",
        }
    }

    /// Validation and test tiles are held out of the normalizing statistics.
    pub fn is_test(self) -> bool {
        self != Split::Train
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Counters collected over a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub tiles: usize,
    pub instances: BTreeMap<Split, usize>,
    pub autoencoder_batches: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Tiles whose raster could not be loaded.
    pub failed_tiles: Vec<PathBuf>,
}

impl SessionSummary {
    pub fn total_instances(&self) -> usize {
        self.instances.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Extraction session
// ---------------------------------------------------------------------------

/// State shared by all tiles of one extraction run: the label table, the
/// class index and the normalizing accumulators.
pub struct ExtractionSession<L: RasterLoader = FileRasterLoader> {
    config: ExtractionConfig,
    labels: LabelTable,
    classes: ClassIndex,
    stats: TileStats,
    tiles_dir: PathBuf,
    savedir: PathBuf,
    loader: L,
    /// Split assignment only; autoencoder draws use `sample_rng`.
    split_rng: StdRng,
    sample_rng: StdRng,
    summary: SessionSummary,
}

impl ExtractionSession<FileRasterLoader> {
    /// Open a session reading tiles with the built-in file loader.
    pub fn new(data_folder: &Path, config: ExtractionConfig) -> Result<Self> {
        let loader = FileRasterLoader::new(config.n_bands);
        Self::with_loader(data_folder, config, loader)
    }
}

impl<L: RasterLoader> ExtractionSession<L> {
    /// Load labels, build the class index and write `classes_to_index.json`.
    ///
    /// Fails if the label file does not exist.
    pub fn with_loader(data_folder: &Path, config: ExtractionConfig, loader: L) -> Result<Self> {
        config.validate()?;

        let label_file = config.label_file(data_folder);
        if !label_file.exists() {
            return Err(ExtractError::MissingLabels(label_file));
        }
        let labels = load_labels(&label_file)?;
        let classes = ClassIndex::from_labels(&labels);
        log::info!(
            "Loaded {} labels ({} classes) from {}",
            labels.len(),
            classes.len(),
            label_file.display()
        );

        let savedir = config.save_dir(data_folder);
        std::fs::create_dir_all(&savedir)?;
        classes.save(&savedir.join(CLASSES_FILE))?;

        Ok(ExtractionSession {
            tiles_dir: config.tiles_dir(data_folder),
            split_rng: StdRng::seed_from_u64(config.seed),
            sample_rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            config,
            labels,
            classes,
            stats: TileStats::new(),
            savedir,
            loader,
            summary: SessionSummary::default(),
        })
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn stats(&self) -> &TileStats {
        &self.stats
    }

    pub fn savedir(&self) -> &Path {
        &self.savedir
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Tile files in the tiles directory, sorted by path.
    ///
    /// Outputs are named after the file stem, so two tiles sharing a stem
    /// (`a.json` and `a.parquet`) are rejected before anything is written.
    pub fn tile_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.tiles_dir)? {
            let path = entry?.path();
            let is_tile = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "parquet" | "json"));
            if path.is_file() && is_tile {
                files.push(path);
            }
        }
        files.sort();
        let mut stems: BTreeMap<&std::ffi::OsStr, &Path> = BTreeMap::new();
        for path in &files {
            let Some(stem) = path.file_stem() else { continue };
            if let Some(other) = stems.insert(stem, path) {
                return Err(ExtractError::Config(format!(
                    "tiles {} and {} would write the same outputs",
                    other.display(),
                    path.display()
                )));
            }
        }
        Ok(files)
    }

    /// Draw the split of the next tile.
    pub fn assign_split(&mut self) -> Split {
        let draw: f64 = self.split_rng.gen();
        if draw < self.config.test_set_size {
            Split::Test
        } else if draw < self.config.test_set_size + self.config.val_set_size {
            Split::Val
        } else {
            Split::Train
        }
    }

    /// Load one tile and extract from it. A load failure is returned before
    /// anything is folded into the accumulators.
    pub fn process_file(&mut self, path: &Path, split: Split) -> Result<TileOutput> {
        let raster = self.loader.load(
            path,
            self.config.start_date,
            self.config.days_per_timestep,
        )?;
        self.process_raster(&raster, split)
    }

    /// Extract from an already loaded tile and update the summary.
    pub fn process_raster(&mut self, raster: &RasterTimeSeries, split: Split) -> Result<TileOutput> {
        let options = TileOptions::from_config(&self.config, split.is_test());
        let output = process_tile(
            raster,
            &self.labels,
            &self.classes,
            &options,
            &mut self.stats,
            &mut self.sample_rng,
        )?;

        self.summary.tiles += 1;
        if output.instance.is_some() {
            *self.summary.instances.entry(split).or_default() += 1;
        }
        if let Some(reason) = output.skip {
            *self.summary.skipped.entry(reason).or_default() += 1;
        }
        if output.autoencoder.is_some() {
            self.summary.autoencoder_batches += 1;
        }
        Ok(output)
    }

    /// Write the outputs of one tile below `<savedir>/<split>/`.
    pub fn write_output(&self, tile: &Path, split: Split, output: &TileOutput) -> Result<()> {
        let stem = tile
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                ExtractError::Config(format!("tile path {} has no file name", tile.display()))
            })?;
        let dir = self.savedir.join(split.dir_name());
        if output.instance.is_some() || output.autoencoder.is_some() {
            std::fs::create_dir_all(&dir)?;
        }
        if let Some(instance) = &output.instance {
            write_json(&dir.join(format!("{stem}.json")), instance)?;
        }
        if let Some(batch) = &output.autoencoder {
            write_json(&dir.join(format!("{stem}_autoencoder.json")), batch)?;
        }
        Ok(())
    }

    /// Process every tile of the tiles directory.
    ///
    /// Tiles that fail to load are logged and listed in the summary; any
    /// other error aborts the run.
    pub fn run(&mut self) -> Result<SessionSummary> {
        let files = self.tile_files()?;
        log::info!("Processing {} tiles from {}", files.len(), self.tiles_dir.display());

        for path in files {
            let split = self.assign_split();
            let raster = match self.loader.load(
                &path,
                self.config.start_date,
                self.config.days_per_timestep,
            ) {
                Ok(raster) => raster,
                Err(e) => {
                    log::warn!("Skipping {}: {e}", path.display());
                    self.summary.failed_tiles.push(path);
                    continue;
                }
            };

            if let (Some(first), Some(last)) = (raster.dates.first(), raster.dates.last()) {
                log::debug!("{} ({split}): {first} to {last}", path.display());
            }
            let output = self.process_raster(&raster, split)?;
            if let Some(reason) = output.skip {
                log::debug!("{}: {reason}", path.display());
            }
            self.write_output(&path, split, &output)?;
        }

        Ok(self.summary.clone())
    }

    /// Write `normalizing_dict.json` and return the final summary.
    pub fn finish(self) -> Result<SessionSummary> {
        let dicts: NormalizingDicts = self.stats.finalize();
        if self.config.calculate_normalizing_dict {
            write_json(&self.savedir.join(NORMALIZING_FILE), &dicts)?;
        }
        log::info!(
            "Extracted {} instances from {} tiles ({} failed to load)",
            self.summary.total_instances(),
            self.summary.tiles,
            self.summary.failed_tiles.len()
        );
        Ok(self.summary)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::fs;
    use tempfile::tempdir;

    fn write_labels(data: &Path) {
        let dir = data.join("processed").join("plant_village_kenya");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("data.geojson"),
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"lat": 0.1, "lon": 36.1, "crop_type": "maize"}},
                {"type": "Feature", "properties": {"lat": 9.0, "lon": 9.0, "crop_type": "tea"}}
            ]}"#,
        )
        .unwrap();
    }

    #[test]
    fn missing_labels_is_fatal() {
        let dir = tempdir().unwrap();
        let err = ExtractionSession::new(dir.path(), ExtractionConfig::default());
        assert!(matches!(err, Err(ExtractError::MissingLabels(_))));
    }

    #[test]
    fn new_writes_class_index() {
        let dir = tempdir().unwrap();
        write_labels(dir.path());
        let session = ExtractionSession::new(dir.path(), ExtractionConfig::default()).unwrap();
        let file = fs::File::open(session.savedir().join(CLASSES_FILE)).unwrap();
        let written: ClassIndex = serde_json::from_reader(file).unwrap();
        assert_eq!(written.index_of("maize"), Some(0));
        assert_eq!(written.index_of("tea"), Some(1));
    }

    #[test]
    fn split_draws_follow_sizes() {
        let dir = tempdir().unwrap();
        write_labels(dir.path());
        let config = ExtractionConfig {
            val_set_size: 0.0,
            test_set_size: 1.0,
            ..Default::default()
        };
        let mut session = ExtractionSession::new(dir.path(), config).unwrap();
        assert!((0..20).all(|_| session.assign_split() == Split::Test));

        let config = ExtractionConfig {
            val_set_size: 0.0,
            test_set_size: 0.0,
            ..Default::default()
        };
        let mut session = ExtractionSession::new(dir.path(), config).unwrap();
        assert!((0..20).all(|_| session.assign_split() == Split::Train));
    }

    #[test]
    fn load_failure_folds_nothing() {
        let dir = tempdir().unwrap();
        write_labels(dir.path());
        let tile = dir.path().join("tile.json");
        fs::write(
            &tile,
            r#"{"x": [36.0, 36.2], "y": [0.2, 0.0], "values": [[[0.1], [0.1]], [[0.1], [0.1]]]}"#,
        )
        .unwrap();
        let config = ExtractionConfig {
            n_bands: 1,
            add_ndvi: false,
            ..Default::default()
        };
        let mut session = ExtractionSession::new(dir.path(), config).unwrap();

        let missing = dir.path().join("missing.json");
        assert!(session.process_file(&missing, Split::Train).is_err());
        assert_eq!(session.stats(), &TileStats::new());

        let out = session.process_file(&tile, Split::Train).unwrap();
        assert_eq!(out.instance.unwrap().crop_label, "maize");
        assert_eq!(session.stats().labelled.instances(), 1);
    }

    #[test]
    fn shared_tile_stems_are_rejected() {
        let dir = tempdir().unwrap();
        write_labels(dir.path());
        let tiles = dir.path().join("raw").join("earth_engine_plant_village_kenya");
        fs::create_dir_all(&tiles).unwrap();
        for name in ["a.json", "a.k.json", "a.parquet", "b.json"] {
            fs::write(tiles.join(name), "{}").unwrap();
        }
        let mut session = ExtractionSession::new(dir.path(), ExtractionConfig::default()).unwrap();
        assert!(matches!(session.tile_files(), Err(ExtractError::Config(_))));
        assert!(session.run().is_err());
        assert!(!session.savedir().join("training").exists());

        fs::remove_file(tiles.join("a.parquet")).unwrap();
        assert_eq!(session.tile_files().unwrap().len(), 3);
    }

    #[test]
    fn validation_tiles_do_not_fold() {
        let dir = tempdir().unwrap();
        write_labels(dir.path());
        let mut session = ExtractionSession::new(dir.path(), ExtractionConfig::default()).unwrap();
        let values = Array3::from_elem((2, 2, 13 * 2), 0.2);
        let raster =
            RasterTimeSeries::new(vec![36.0, 36.2], vec![0.2, 0.0], values, 13).unwrap();

        let out = session.process_raster(&raster, Split::Val).unwrap();
        assert!(out.instance.is_some());
        assert_eq!(session.stats().labelled.instances(), 0);

        session.process_raster(&raster, Split::Train).unwrap();
        assert_eq!(session.stats().labelled.instances(), 1);
        assert_eq!(session.summary().instances.get(&Split::Val), Some(&1));
        assert_eq!(session.summary().total_instances(), 2);
    }
}
