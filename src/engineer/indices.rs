//! NDVI / NDWI derivation.
//!
//! Indices are appended as extra channels after the raw bands. Band
//! positions always refer to the raw bands, so adding NDVI and then NDWI
//! yields `[..raw, ndvi, ndwi]`.

use ndarray::{Array, Axis, Dimension, RemoveAxis, Slice, Zip, concatenate};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

// ---------------------------------------------------------------------------
// Band layout
// ---------------------------------------------------------------------------

/// Channel positions of the reflectance bands the indices read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandLayout {
    pub green: usize,
    pub red: usize,
    pub nir: usize,
    pub swir1: usize,
}

impl BandLayout {
    /// Band order of a full Sentinel-2 L1C export.
    pub const SENTINEL2_BANDS: [&'static str; 13] = [
        "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B9", "B10", "B11", "B12",
    ];
}

impl Default for BandLayout {
    fn default() -> Self {
        BandLayout {
            green: 2,  // B3
            red: 3,    // B4
            nir: 7,    // B8
            swir1: 11, // B11
        }
    }
}

// ---------------------------------------------------------------------------
// Index computation
// ---------------------------------------------------------------------------

/// `(a - b) / (a + b)`, or 0 where the sum is not positive (NaN included).
pub fn normalized_difference(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum > 0.0 { (a - b) / sum } else { 0.0 }
}

/// Append NDVI, `(nir - red) / (nir + red)`, along `channel_axis`.
pub fn calculate_ndvi<D>(
    array: &Array<f64, D>,
    channel_axis: Axis,
    layout: &BandLayout,
) -> Result<Array<f64, D>>
where
    D: Dimension + RemoveAxis,
{
    append_normalized_difference(array, channel_axis, ("nir", layout.nir), ("red", layout.red))
}

/// Append NDWI, `(green - swir1) / (green + swir1)`, along `channel_axis`.
pub fn calculate_ndwi<D>(
    array: &Array<f64, D>,
    channel_axis: Axis,
    layout: &BandLayout,
) -> Result<Array<f64, D>>
where
    D: Dimension + RemoveAxis,
{
    append_normalized_difference(
        array,
        channel_axis,
        ("green", layout.green),
        ("swir1", layout.swir1),
    )
}

/// Apply the enabled indices in the fixed order NDVI, NDWI.
pub fn add_indices<D>(
    mut array: Array<f64, D>,
    channel_axis: Axis,
    add_ndvi: bool,
    add_ndwi: bool,
    layout: &BandLayout,
) -> Result<Array<f64, D>>
where
    D: Dimension + RemoveAxis,
{
    if add_ndvi {
        array = calculate_ndvi(&array, channel_axis, layout)?;
    }
    if add_ndwi {
        array = calculate_ndwi(&array, channel_axis, layout)?;
    }
    Ok(array)
}

fn append_normalized_difference<D>(
    array: &Array<f64, D>,
    channel_axis: Axis,
    first: (&'static str, usize),
    second: (&'static str, usize),
) -> Result<Array<f64, D>>
where
    D: Dimension + RemoveAxis,
{
    let available = array.len_of(channel_axis);
    for (band, position) in [first, second] {
        if position >= available {
            return Err(ExtractError::MissingBand {
                band,
                position,
                available,
            });
        }
    }

    let a = array.slice_axis(channel_axis, Slice::from(first.1..first.1 + 1));
    let b = array.slice_axis(channel_axis, Slice::from(second.1..second.1 + 1));
    let index = Zip::from(&a)
        .and(&b)
        .map_collect(|&a, &b| normalized_difference(a, b));

    concatenate(channel_axis, &[array.view(), index.view()])
        .map_err(|e| ExtractError::InvalidShape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, s};

    fn series(t: usize) -> Array2<f64> {
        Array2::from_shape_fn((t, 13), |(t, b)| (t + 1) as f64 * 0.01 * (b + 1) as f64)
    }

    #[test]
    fn ndvi_appended_as_last_channel() {
        let px = series(2);
        let out = calculate_ndvi(&px, Axis(1), &BandLayout::default()).unwrap();
        assert_eq!(out.dim(), (2, 14));
        let (nir, red) = (px[[0, 7]], px[[0, 3]]);
        assert!((out[[0, 13]] - (nir - red) / (nir + red)).abs() < 1e-12);
        assert_eq!(out.slice(s![.., ..13]), px);
    }

    #[test]
    fn ndwi_after_ndvi_reads_raw_bands() {
        let px = series(3);
        let out = add_indices(px.clone(), Axis(1), true, true, &BandLayout::default()).unwrap();
        assert_eq!(out.dim(), (3, 15));
        let (green, swir) = (px[[2, 2]], px[[2, 11]]);
        assert!((out[[2, 14]] - (green - swir) / (green + swir)).abs() < 1e-12);
    }

    #[test]
    fn zero_or_nan_sum_gives_zero() {
        assert_eq!(normalized_difference(0.0, 0.0), 0.0);
        assert_eq!(normalized_difference(f64::NAN, 0.3), 0.0);
        assert_eq!(normalized_difference(-0.2, 0.1), 0.0);
    }

    #[test]
    fn neighbourhood_arrays_use_channel_axis_one() {
        let around = Array3::from_elem((4, 13, 9), 0.5);
        let out = calculate_ndvi(&around, Axis(1), &BandLayout::default()).unwrap();
        assert_eq!(out.dim(), (4, 14, 9));
        assert!(out.slice(s![.., 13, ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn missing_band_is_an_error() {
        let px = Array2::<f64>::zeros((2, 4));
        let err = calculate_ndvi(&px, Axis(1), &BandLayout::default()).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::MissingBand { band: "nir", position: 7, available: 4 }
        ));
    }

    #[test]
    fn disabled_indices_leave_array_untouched() {
        let px = series(2);
        let out = add_indices(px.clone(), Axis(1), false, false, &BandLayout::default()).unwrap();
        assert_eq!(out, px);
    }
}
