use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::data::model::LabelTable;
use crate::error::{ExtractError, Result};

// ---------------------------------------------------------------------------
// ClassIndex: crop type → dense integer id
// ---------------------------------------------------------------------------

/// Bijective mapping between crop types and ids `0..n`.
///
/// Ids follow first-seen order of the distinct non-null crop types. On disk
/// it is a flat JSON object (`{"maize": 0, "tea": 1}`) written in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, usize>")]
pub struct ClassIndex {
    classes: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ClassIndex {
    /// Build the index from every non-null crop type of the table.
    pub fn from_labels(labels: &LabelTable) -> Self {
        Self::from_crop_types(labels.crop_types())
    }

    pub fn from_crop_types<'a>(crop_types: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = ClassIndex::default();
        for crop in crop_types {
            if !index.lookup.contains_key(crop) {
                index.lookup.insert(crop.to_string(), index.classes.len());
                index.classes.push(crop.to_string());
            }
        }
        index
    }

    pub fn index_of(&self, crop_type: &str) -> Option<usize> {
        self.lookup.get(crop_type).copied()
    }

    /// `(id, crop type)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.classes.iter().map(String::as_str).enumerate()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Write the index as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

impl Serialize for ClassIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.classes.len()))?;
        for (id, crop) in self.iter() {
            map.serialize_entry(crop, &id)?;
        }
        map.end()
    }
}

impl TryFrom<BTreeMap<String, usize>> for ClassIndex {
    type Error = ExtractError;

    fn try_from(map: BTreeMap<String, usize>) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (crop, id) in map {
            let Some(slot) = slots.get_mut(id) else {
                return Err(ExtractError::InvalidClassIndex(format!(
                    "id {id} of '{crop}' is not contiguous from 0"
                )));
            };
            if let Some(other) = slot {
                return Err(ExtractError::InvalidClassIndex(format!(
                    "id {id} used by both '{other}' and '{crop}'"
                )));
            }
            *slot = Some(crop);
        }
        // every id is < len and unique, so every slot is filled
        let classes: Vec<String> = slots.into_iter().flatten().collect();
        Ok(ClassIndex::from_crop_types(classes.iter().map(String::as_str)))
    }
}
