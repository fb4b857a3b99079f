/// Closest coordinate to `target` and its index.
///
/// Ties go to the first occurrence. NaN coordinates never win. Returns
/// `None` for an empty (or all-NaN) vector.
pub fn find_nearest(coords: &[f64], target: f64) -> Option<(f64, usize)> {
    let mut best: Option<(f64, usize, f64)> = None;
    for (idx, &value) in coords.iter().enumerate() {
        let dist = (value - target).abs();
        if dist.is_nan() {
            continue;
        }
        match best {
            Some((_, _, best_dist)) if dist >= best_dist => {}
            _ => best = Some((value, idx, dist)),
        }
    }
    best.map(|(value, idx, _)| (value, idx))
}
