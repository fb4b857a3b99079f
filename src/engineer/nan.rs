use ndarray::{Array, Dimension};

/// Fraction of NaN entries; 0 for an empty array.
pub fn nan_ratio<D: Dimension>(array: &Array<f64, D>) -> f64 {
    if array.is_empty() {
        return 0.0;
    }
    let nans = array.iter().filter(|v| v.is_nan()).count();
    nans as f64 / array.len() as f64
}

/// Replace NaNs with `nan_fill`, unless the NaN fraction exceeds
/// `max_nan_ratio`, in which case the array is rejected.
///
/// `None` as ratio means "always fill".
pub fn maxed_nan_to_num<D: Dimension>(
    mut array: Array<f64, D>,
    nan_fill: f64,
    max_nan_ratio: Option<f64>,
) -> Option<Array<f64, D>> {
    if let Some(max_ratio) = max_nan_ratio {
        if nan_ratio(&array) > max_ratio {
            return None;
        }
    }
    array.mapv_inplace(|v| if v.is_nan() { nan_fill } else { v });
    Some(array)
}
