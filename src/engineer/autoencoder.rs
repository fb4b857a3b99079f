use ndarray::{Array2, Array3, Axis, stack};
use rand::Rng;
use rand::seq::index;

use super::indices::add_indices;
use super::instance::TileOptions;
use super::nan::maxed_nan_to_num;
use crate::data::model::RasterTimeSeries;
use crate::error::{ExtractError, Result};

/// Sample unlabelled `[timesteps, channels]` series from a tile.
///
/// Draws up to `options.autoencoder_instances_per_label` distinct cells
/// without replacement, never the `exclude` cell (the labelled one). Each
/// series gets the same index derivation and NaN gate as a labelled
/// instance; rejected series are dropped. Returns `[n, timesteps, channels]`
/// in cell order, or `None` when nothing survives.
pub fn sample_autoencoder_instances<R: Rng + ?Sized>(
    raster: &RasterTimeSeries,
    exclude: Option<(usize, usize)>,
    options: &TileOptions,
    rng: &mut R,
) -> Result<Option<Array3<f64>>> {
    let n_lat = raster.y.len();
    let total = raster.x.len() * n_lat;
    let excluded = exclude
        .map(|(lon_idx, lat_idx)| lon_idx * n_lat + lat_idx)
        .filter(|&cell| cell < total);
    let candidates = total - usize::from(excluded.is_some());
    let amount = options.autoencoder_instances_per_label.min(candidates);
    if amount == 0 {
        return Ok(None);
    }

    let mut cells: Vec<usize> = index::sample(rng, candidates, amount)
        .into_iter()
        .map(|k| match excluded {
            Some(ex) if k >= ex => k + 1,
            _ => k,
        })
        .collect();
    cells.sort_unstable();

    let mut kept: Vec<Array2<f64>> = Vec::with_capacity(cells.len());
    for cell in cells {
        let series = raster.pixel(cell / n_lat, cell % n_lat);
        let series = add_indices(series, Axis(1), options.add_ndvi, options.add_ndwi, &options.bands)?;
        if let Some(series) = maxed_nan_to_num(series, options.nan_fill, options.max_nan_ratio) {
            kept.push(series);
        }
    }
    if kept.is_empty() {
        return Ok(None);
    }

    let views: Vec<_> = kept.iter().map(Array2::view).collect();
    let batch = stack(Axis(0), &views).map_err(|e| ExtractError::InvalidShape(e.to_string()))?;
    Ok(Some(batch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// 3x2 grid, 2 timesteps, 1 band; value = cell id, NaN in cell 5.
    fn tile() -> RasterTimeSeries {
        let values = Array3::from_shape_fn((3, 2, 2), |(x, y, _)| {
            let cell = x * 2 + y;
            if cell == 5 { f64::NAN } else { cell as f64 }
        });
        RasterTimeSeries::new(vec![0.0, 1.0, 2.0], vec![1.0, 0.0], values, 1).unwrap()
    }

    fn options(n: usize) -> TileOptions {
        TileOptions {
            add_ndvi: false,
            return_autoencoder_instances: true,
            autoencoder_instances_per_label: n,
            ..TileOptions::default()
        }
    }

    #[test]
    fn never_samples_the_labelled_cell() {
        let mut rng = StdRng::seed_from_u64(3);
        let batch = sample_autoencoder_instances(&tile(), Some((1, 0)), &options(100), &mut rng)
            .unwrap()
            .unwrap();
        // 6 cells minus the labelled one minus the all-NaN one
        let ids: Vec<f64> = batch.outer_iter().map(|s| s[[0, 0]]).collect();
        assert_eq!(ids, vec![0.0, 1.0, 3.0, 4.0]);
        assert_eq!(batch.dim(), (4, 2, 1));
    }

    #[test]
    fn respects_requested_count() {
        let mut rng = StdRng::seed_from_u64(11);
        let batch = sample_autoencoder_instances(&tile(), None, &options(2), &mut rng)
            .unwrap()
            .unwrap();
        assert!(batch.dim().0 <= 2);
        assert!(batch.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn same_seed_same_sample() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            sample_autoencoder_instances(&tile(), None, &options(3), &mut rng).unwrap()
        };
        assert_eq!(draw(5), draw(5));
    }

    #[test]
    fn zero_requested_is_none() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sample_autoencoder_instances(&tile(), None, &options(0), &mut rng)
            .unwrap()
            .is_none());
    }
}
