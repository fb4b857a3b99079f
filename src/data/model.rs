use chrono::{Days, NaiveDate};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

// ---------------------------------------------------------------------------
// LabelRecord – one ground-truth point
// ---------------------------------------------------------------------------

/// A geo-referenced crop-type label (WGS84 degrees).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub lat: f64,
    pub lon: f64,
    /// `None` when the upstream survey recorded no crop.
    pub crop_type: Option<String>,
}

impl LabelRecord {
    pub fn new(lat: f64, lon: f64, crop_type: Option<&str>) -> Self {
        LabelRecord {
            lat,
            lon,
            crop_type: crop_type.map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// LabelTable – the complete loaded label set
// ---------------------------------------------------------------------------

/// Ordered, immutable collection of labels. Row order is the order of the
/// source file and is what the label selection policies rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    records: Vec<LabelRecord>,
}

impl LabelTable {
    pub fn from_records(records: Vec<LabelRecord>) -> Self {
        LabelTable { records }
    }

    pub fn records(&self) -> &[LabelRecord] {
        &self.records
    }

    /// Non-null crop types in row order, duplicates included.
    pub fn crop_types(&self) -> impl Iterator<Item = &str> {
        self.records.iter().filter_map(|r| r.crop_type.as_deref())
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// BoundingBox – spatial extent of a tile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Inclusive on all four edges.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

// ---------------------------------------------------------------------------
// RasterTimeSeries – one loaded tile
// ---------------------------------------------------------------------------

/// A gridded time series: `values[[x_idx, y_idx, t * n_bands + band]]`.
///
/// `x` holds the longitude of every column and `y` the latitude of every
/// row; both are monotonic.
#[derive(Debug, Clone)]
pub struct RasterTimeSeries {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    values: Array3<f64>,
    n_bands: usize,
    /// Start date of every timestep (empty when the tile carries no time axis).
    pub dates: Vec<NaiveDate>,
}

impl RasterTimeSeries {
    /// Assemble a tile, checking that coordinates and values agree.
    pub fn new(x: Vec<f64>, y: Vec<f64>, values: Array3<f64>, n_bands: usize) -> Result<Self> {
        let (nx, ny, depth) = values.dim();
        if nx != x.len() || ny != y.len() {
            return Err(ExtractError::InvalidShape(format!(
                "values grid is {nx}x{ny} but coordinates are {}x{}",
                x.len(),
                y.len()
            )));
        }
        if n_bands == 0 || depth % n_bands != 0 {
            return Err(ExtractError::InvalidShape(format!(
                "{depth} values per cell is not a multiple of {n_bands} bands"
            )));
        }
        Ok(RasterTimeSeries {
            x,
            y,
            values,
            n_bands,
            dates: Vec::new(),
        })
    }

    /// Label each timestep with its start date.
    pub fn with_time_axis(mut self, start_date: NaiveDate, days_per_timestep: u32) -> Self {
        self.dates = (0..self.n_timesteps())
            .filter_map(|t| {
                start_date.checked_add_days(Days::new(t as u64 * days_per_timestep as u64))
            })
            .collect();
        self
    }

    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    pub fn n_timesteps(&self) -> usize {
        self.values.dim().2 / self.n_bands
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    /// Extent covered by the cell centres, or `None` for an empty grid.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let (min_lon, max_lon) = min_max(&self.x)?;
        let (min_lat, max_lat) = min_max(&self.y)?;
        Some(BoundingBox {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        })
    }

    /// The `[timesteps, bands]` series of one cell.
    pub fn pixel(&self, lon_idx: usize, lat_idx: usize) -> Array2<f64> {
        let bands = self.n_bands;
        Array2::from_shape_fn((self.n_timesteps(), bands), |(t, b)| {
            self.values[[lon_idx, lat_idx, t * bands + b]]
        })
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
