use ndarray::{Array2, Array3, s};

use crate::data::model::RasterTimeSeries;

/// Cells in the 3x3 neighbourhood, centre included.
pub const NEIGHBOURHOOD: usize = 9;

/// Slot of the centre cell in the last axis of a surrounding array.
pub const CENTRE_SLOT: usize = 4;

/// The `[timesteps, bands]` series at one cell.
pub fn labelled_pixels(raster: &RasterTimeSeries, lon_idx: usize, lat_idx: usize) -> Array2<f64> {
    raster.pixel(lon_idx, lat_idx)
}

/// The `[timesteps, bands, 9]` series of the 3x3 block around a cell.
///
/// Slots run row-major over `(d_lat, d_lon)` in `{-1, 0, 1}²`, so slot 4 is
/// the centre. At the tile edge indices are clamped, i.e. the border cell
/// is repeated in place of the missing neighbour.
pub fn surrounding_pixels(
    raster: &RasterTimeSeries,
    lon_idx: usize,
    lat_idx: usize,
) -> Array3<f64> {
    let mut out = Array3::zeros((raster.n_timesteps(), raster.n_bands(), NEIGHBOURHOOD));
    let offsets = (-1..=1).flat_map(|d_lat| (-1..=1).map(move |d_lon| (d_lat, d_lon)));
    for (slot, (d_lat, d_lon)) in offsets.enumerate() {
        let x = clamp_index(lon_idx, d_lon, raster.x.len());
        let y = clamp_index(lat_idx, d_lat, raster.y.len());
        out.slice_mut(s![.., .., slot]).assign(&raster.pixel(x, y));
    }
    out
}

fn clamp_index(idx: usize, delta: isize, len: usize) -> usize {
    let last = len.saturating_sub(1) as isize;
    (idx as isize + delta).clamp(0, last) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3x3 grid, one timestep, one band; value = 10 * x + y.
    fn tile() -> RasterTimeSeries {
        let values = Array3::from_shape_fn((3, 3, 1), |(x, y, _)| (10 * x + y) as f64);
        RasterTimeSeries::new(vec![0.0, 1.0, 2.0], vec![2.0, 1.0, 0.0], values, 1).unwrap()
    }

    fn slots(arr: &Array3<f64>) -> Vec<f64> {
        arr.slice(s![0, 0, ..]).to_vec()
    }

    #[test]
    fn interior_block_is_row_major() {
        let around = surrounding_pixels(&tile(), 1, 1);
        assert_eq!(around.dim(), (1, 1, NEIGHBOURHOOD));
        assert_eq!(
            slots(&around),
            vec![0.0, 10.0, 20.0, 1.0, 11.0, 21.0, 2.0, 12.0, 22.0]
        );
        assert_eq!(around[[0, 0, CENTRE_SLOT]], labelled_pixels(&tile(), 1, 1)[[0, 0]]);
    }

    #[test]
    fn corner_clamps_to_edge() {
        let around = surrounding_pixels(&tile(), 0, 0);
        assert_eq!(
            slots(&around),
            vec![0.0, 0.0, 10.0, 0.0, 0.0, 10.0, 1.0, 1.0, 11.0]
        );
    }

    #[test]
    fn single_cell_tile_repeats_itself() {
        let values = Array3::from_elem((1, 1, 2), 7.0);
        let raster = RasterTimeSeries::new(vec![0.0], vec![0.0], values, 2).unwrap();
        let around = surrounding_pixels(&raster, 0, 0);
        assert_eq!(around.dim(), (1, 2, NEIGHBOURHOOD));
        assert!(around.iter().all(|&v| v == 7.0));
    }
}
