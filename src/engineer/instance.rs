use std::fmt;

use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::autoencoder::sample_autoencoder_instances;
use super::classes::ClassIndex;
use super::indices::{BandLayout, add_indices};
use super::nan::maxed_nan_to_num;
use super::nearest::find_nearest;
use super::normalize::TileStats;
use super::window::{labelled_pixels, surrounding_pixels};
use crate::config::ExtractionConfig;
use crate::data::filter::{LabelMatch, LabelSelection, select_label};
use crate::data::model::{LabelTable, RasterTimeSeries};
use crate::error::{ExtractError, Result};

/// Channel axis of `[timesteps, channels]` and `[timesteps, channels, 9]`.
const CHANNEL_AXIS: Axis = Axis(1);

// ---------------------------------------------------------------------------
// DataInstance
// ---------------------------------------------------------------------------

/// One labelled training instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInstance {
    pub label_lat: f64,
    pub label_lon: f64,
    /// Coordinates of the cell the arrays were read from.
    pub instance_lat: f64,
    pub instance_lon: f64,
    /// `[timesteps, channels]`
    pub labelled_array: Array2<f64>,
    pub crop_label: String,
    pub crop_int: usize,
    /// `[timesteps, channels, 9]`
    pub surrounding_array: Array3<f64>,
}

/// Why a tile produced no labelled instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoOverlap,
    NullCropType,
    NanRatioExceeded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoOverlap => write!(f, "no label inside tile"),
            SkipReason::NullCropType => write!(f, "label has no crop type"),
            SkipReason::NanRatioExceeded => write!(f, "too many missing values"),
        }
    }
}

/// Everything one tile yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileOutput {
    pub instance: Option<DataInstance>,
    /// `[n, timesteps, channels]`
    pub autoencoder: Option<Array3<f64>>,
    /// Set exactly when `instance` is `None`.
    pub skip: Option<SkipReason>,
}

// ---------------------------------------------------------------------------
// Per-tile options
// ---------------------------------------------------------------------------

/// The subset of the session configuration one tile needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOptions {
    pub nan_fill: f64,
    pub max_nan_ratio: Option<f64>,
    pub add_ndvi: bool,
    pub add_ndwi: bool,
    pub bands: BandLayout,
    pub calculate_normalizing_dict: bool,
    /// Test tiles never feed the normalizing accumulators.
    pub is_test: bool,
    pub return_autoencoder_instances: bool,
    pub autoencoder_instances_per_label: usize,
    pub label_selection: LabelSelection,
}

impl TileOptions {
    pub fn from_config(config: &ExtractionConfig, is_test: bool) -> Self {
        TileOptions {
            nan_fill: config.nan_fill,
            max_nan_ratio: config.max_nan_ratio,
            add_ndvi: config.add_ndvi,
            add_ndwi: config.add_ndwi,
            bands: config.bands,
            calculate_normalizing_dict: config.calculate_normalizing_dict,
            is_test,
            return_autoencoder_instances: config.return_autoencoder_instances,
            autoencoder_instances_per_label: config.autoencoder_instances_per_label,
            label_selection: config.label_selection,
        }
    }
}

impl Default for TileOptions {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default(), false)
    }
}

// ---------------------------------------------------------------------------
// Tile processing
// ---------------------------------------------------------------------------

/// Extract the labelled instance (if any) and autoencoder samples of a tile.
///
/// `stats` is only touched on non-test tiles with statistics enabled. The
/// labelled instance is folded when it passes the NaN gate, and every
/// surviving autoencoder series is folded into the labelled accumulator.
pub fn process_tile<R: Rng + ?Sized>(
    raster: &RasterTimeSeries,
    labels: &LabelTable,
    classes: &ClassIndex,
    options: &TileOptions,
    stats: &mut TileStats,
    rng: &mut R,
) -> Result<TileOutput> {
    let mut output = TileOutput::default();
    let mut labelled_cell = None;

    let selected = match raster.bounds() {
        Some(bounds) => select_label(labels, &bounds, options.label_selection),
        None => LabelMatch::None,
    };

    match selected {
        LabelMatch::None => output.skip = Some(SkipReason::NoOverlap),
        LabelMatch::Unlabelled(_) => output.skip = Some(SkipReason::NullCropType),
        LabelMatch::Labelled(label) => {
            let crop_label = label.crop_type.clone().unwrap_or_default();
            let crop_int = classes
                .index_of(&crop_label)
                .ok_or_else(|| ExtractError::UnknownClass(crop_label.clone()))?;

            let (closest_lon, lon_idx) = find_nearest(&raster.x, label.lon)
                .ok_or_else(|| ExtractError::InvalidShape("tile has no longitudes".into()))?;
            let (closest_lat, lat_idx) = find_nearest(&raster.y, label.lat)
                .ok_or_else(|| ExtractError::InvalidShape("tile has no latitudes".into()))?;
            labelled_cell = Some((lon_idx, lat_idx));

            let labelled = add_indices(
                labelled_pixels(raster, lon_idx, lat_idx),
                CHANNEL_AXIS,
                options.add_ndvi,
                options.add_ndwi,
                &options.bands,
            )?;
            let surrounding = add_indices(
                surrounding_pixels(raster, lon_idx, lat_idx),
                CHANNEL_AXIS,
                options.add_ndvi,
                options.add_ndwi,
                &options.bands,
            )?;

            let labelled = maxed_nan_to_num(labelled, options.nan_fill, options.max_nan_ratio);
            let surrounding = maxed_nan_to_num(surrounding, options.nan_fill, None);

            match (labelled, surrounding) {
                (Some(labelled_array), Some(surrounding_array)) => {
                    if options.calculate_normalizing_dict && !options.is_test {
                        stats.fold(&labelled_array, &surrounding_array)?;
                    }
                    output.instance = Some(DataInstance {
                        label_lat: label.lat,
                        label_lon: label.lon,
                        instance_lat: closest_lat,
                        instance_lon: closest_lon,
                        labelled_array,
                        crop_label,
                        crop_int,
                        surrounding_array,
                    });
                }
                _ => output.skip = Some(SkipReason::NanRatioExceeded),
            }
        }
    }

    if options.return_autoencoder_instances {
        output.autoencoder = sample_autoencoder_instances(raster, labelled_cell, options, rng)?;
        if let Some(batch) = &output.autoencoder {
            if options.calculate_normalizing_dict && !options.is_test {
                stats.fold_unlabelled(batch)?;
            }
        }
    }

    Ok(output)
}
