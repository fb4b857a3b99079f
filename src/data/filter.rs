use serde::{Deserialize, Serialize};

use super::model::{BoundingBox, LabelRecord, LabelTable};

// ---------------------------------------------------------------------------
// Label selection policy
// ---------------------------------------------------------------------------

/// Which of the labels inside a tile becomes the labelled instance.
///
/// Only one label is used per tile. Label files are not guaranteed to keep
/// a stable row order across loaders, so the choice is made explicit here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSelection {
    /// First row inside the tile. If it has no crop type the tile yields no
    /// labelled instance, even when later rows carry one.
    FirstMatch,
    /// First row inside the tile that has a crop type.
    #[default]
    FirstLabelled,
}

/// Outcome of searching a tile for a label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabelMatch<'a> {
    /// No row lies inside the tile.
    None,
    /// The selected row has no crop type.
    Unlabelled(&'a LabelRecord),
    /// The selected row, guaranteed to carry a crop type.
    Labelled(&'a LabelRecord),
}

/// Return indices of labels inside `bounds`, in table order.
pub fn overlapping_indices(labels: &LabelTable, bounds: &BoundingBox) -> Vec<usize> {
    labels
        .records()
        .iter()
        .enumerate()
        .filter(|(_, r)| bounds.contains(r.lat, r.lon))
        .map(|(i, _)| i)
        .collect()
}

/// Pick the label for a tile according to `policy`.
pub fn select_label<'a>(
    labels: &'a LabelTable,
    bounds: &BoundingBox,
    policy: LabelSelection,
) -> LabelMatch<'a> {
    let records = labels.records();
    let mut inside = overlapping_indices(labels, bounds)
        .into_iter()
        .map(|i| &records[i]);

    match policy {
        LabelSelection::FirstMatch => match inside.next() {
            None => LabelMatch::None,
            Some(r) if r.crop_type.is_some() => LabelMatch::Labelled(r),
            Some(r) => LabelMatch::Unlabelled(r),
        },
        LabelSelection::FirstLabelled => {
            let mut first_unlabelled = None;
            for r in inside {
                if r.crop_type.is_some() {
                    return LabelMatch::Labelled(r);
                }
                first_unlabelled.get_or_insert(r);
            }
            match first_unlabelled {
                Some(r) => LabelMatch::Unlabelled(r),
                None => LabelMatch::None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> BoundingBox {
        BoundingBox {
            min_lon: 36.0,
            max_lon: 36.1,
            min_lat: 0.0,
            max_lat: 0.1,
        }
    }

    fn table() -> LabelTable {
        LabelTable::from_records(vec![
            LabelRecord::new(5.0, 5.0, Some("maize")),
            LabelRecord::new(0.05, 36.05, None),
            LabelRecord::new(0.1, 36.1, Some("tea")),
            LabelRecord::new(0.0, 36.0, Some("maize")),
        ])
    }

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(overlapping_indices(&table(), &bounds()), vec![1, 2, 3]);
    }

    #[test]
    fn first_match_stops_at_null_crop() {
        let labels = table();
        match select_label(&labels, &bounds(), LabelSelection::FirstMatch) {
            LabelMatch::Unlabelled(r) => assert_eq!(r.lat, 0.05),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn first_labelled_skips_null_crop() {
        let labels = table();
        match select_label(&labels, &bounds(), LabelSelection::FirstLabelled) {
            LabelMatch::Labelled(r) => assert_eq!(r.crop_type.as_deref(), Some("tea")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_overlap_yields_none() {
        let labels = LabelTable::from_records(vec![LabelRecord::new(5.0, 5.0, Some("maize"))]);
        for policy in [LabelSelection::FirstMatch, LabelSelection::FirstLabelled] {
            assert_eq!(select_label(&labels, &bounds(), policy), LabelMatch::None);
        }
    }

    #[test]
    fn selected_iff_labelled_row_inside() {
        // Exhaustive over small tables: 3 rows, each inside/outside and
        // labelled/unlabelled.
        let inside = (0.05, 36.05);
        let outside = (9.0, 9.0);
        for mask in 0..64u32 {
            let records: Vec<_> = (0..3u32)
                .map(|i| {
                    let (lat, lon) = if mask >> (2 * i) & 1 == 1 { inside } else { outside };
                    let crop = (mask >> (2 * i + 1) & 1 == 1).then_some("maize");
                    LabelRecord::new(lat, lon, crop)
                })
                .collect();
            let expected = records
                .iter()
                .any(|r| bounds().contains(r.lat, r.lon) && r.crop_type.is_some());
            let labels = LabelTable::from_records(records);
            let got = matches!(
                select_label(&labels, &bounds(), LabelSelection::FirstLabelled),
                LabelMatch::Labelled(_)
            );
            assert_eq!(got, expected, "mask {mask:06b}");
        }
    }
}
