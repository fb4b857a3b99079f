use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::filter::LabelSelection;
use crate::engineer::indices::BandLayout;
use crate::error::{ExtractError, Result};

// ---------------------------------------------------------------------------
// Extraction configuration
// ---------------------------------------------------------------------------

/// All knobs of an extraction session.
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it changes:
///
/// ```json
/// { "add_ndwi": true, "max_nan_ratio": 0.5, "seed": 7 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Directory under `<data>/processed/` holding `data.geojson`.
    pub labels_dataset: String,
    /// Explicit label file; overrides `labels_dataset` when set.
    pub label_path: Option<PathBuf>,
    /// Directory under `<data>/raw/` holding the raster tiles.
    pub tiles_dataset: String,
    /// Directory under `<data>/features/` receiving the outputs.
    pub output_dataset: String,

    /// Value written in place of missing reflectance.
    pub nan_fill: f64,
    /// Reject a labelled or autoencoder series with more NaNs than this.
    pub max_nan_ratio: Option<f64>,
    pub add_ndvi: bool,
    pub add_ndwi: bool,
    /// Fold training instances into the normalizing accumulators.
    pub calculate_normalizing_dict: bool,

    /// Date of the first timestep of every tile.
    pub start_date: NaiveDate,
    pub days_per_timestep: u32,
    /// Reflectance bands per timestep in a tile.
    pub n_bands: usize,
    pub bands: BandLayout,

    pub return_autoencoder_instances: bool,
    pub autoencoder_instances_per_label: usize,

    /// Fraction of tiles assigned to the validation split.
    pub val_set_size: f64,
    /// Fraction of tiles assigned to the test split.
    pub test_set_size: f64,
    pub seed: u64,
    pub label_selection: LabelSelection,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            labels_dataset: "plant_village_kenya".to_string(),
            label_path: None,
            tiles_dataset: "earth_engine_plant_village_kenya".to_string(),
            output_dataset: "plant_village_kenya".to_string(),
            nan_fill: 0.0,
            max_nan_ratio: Some(0.3),
            add_ndvi: true,
            add_ndwi: false,
            calculate_normalizing_dict: true,
            start_date: NaiveDate::from_ymd_opt(2019, 4, 1).unwrap_or_default(),
            days_per_timestep: 30,
            n_bands: BandLayout::SENTINEL2_BANDS.len(),
            bands: BandLayout::default(),
            return_autoencoder_instances: false,
            autoencoder_instances_per_label: 10,
            val_set_size: 0.1,
            test_set_size: 0.1,
            seed: 42,
            label_selection: LabelSelection::default(),
        }
    }
}

impl ExtractionConfig {
    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that would otherwise surface as odd output.
    pub fn validate(&self) -> Result<()> {
        if let Some(ratio) = self.max_nan_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ExtractError::Config(format!(
                    "max_nan_ratio must lie in [0, 1], got {ratio}"
                )));
            }
        }
        for (name, size) in [
            ("val_set_size", self.val_set_size),
            ("test_set_size", self.test_set_size),
        ] {
            if !(0.0..=1.0).contains(&size) {
                return Err(ExtractError::Config(format!(
                    "{name} must lie in [0, 1], got {size}"
                )));
            }
        }
        if self.val_set_size + self.test_set_size > 1.0 {
            return Err(ExtractError::Config(format!(
                "val_set_size + test_set_size exceeds 1 ({} + {})",
                self.val_set_size, self.test_set_size
            )));
        }
        if self.n_bands == 0 {
            return Err(ExtractError::Config("n_bands must be positive".into()));
        }
        if self.days_per_timestep == 0 {
            return Err(ExtractError::Config(
                "days_per_timestep must be positive".into(),
            ));
        }
        let mut used = Vec::new();
        if self.add_ndvi {
            used.extend([("nir", self.bands.nir), ("red", self.bands.red)]);
        }
        if self.add_ndwi {
            used.extend([("green", self.bands.green), ("swir1", self.bands.swir1)]);
        }
        if let Some((band, position)) = used.into_iter().find(|&(_, p)| p >= self.n_bands) {
            return Err(ExtractError::Config(format!(
                "band {band} at position {position} is outside the {} tile bands",
                self.n_bands
            )));
        }
        Ok(())
    }

    /// Location of the label table inside `data_folder`.
    pub fn label_file(&self, data_folder: &Path) -> PathBuf {
        match &self.label_path {
            Some(path) => path.clone(),
            None => data_folder
                .join("processed")
                .join(&self.labels_dataset)
                .join("data.geojson"),
        }
    }

    /// Directory scanned for raster tiles.
    pub fn tiles_dir(&self, data_folder: &Path) -> PathBuf {
        data_folder.join("raw").join(&self.tiles_dataset)
    }

    /// Directory receiving every session output.
    pub fn save_dir(&self, data_folder: &Path) -> PathBuf {
        data_folder.join("features").join(&self.output_dataset)
    }
}
