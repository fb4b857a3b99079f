/// Instance extraction: everything that happens to one loaded tile.
///
/// ```text
///   RasterTimeSeries + LabelTable
///        │
///        ▼
///   ┌────────────┐
///   │  filter     │  label inside the tile extent (data::filter)
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  nearest    │  closest lon / lat cell
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  window     │  [T, F] pixel + [T, F, 9] neighbourhood
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  indices    │  append NDVI / NDWI
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  nan        │  NaN gate + fill
///   └────────────┘
///        │
///        ▼
///   ┌────────────┐
///   │  normalize  │  fold into TileStats (training tiles only)
///   └────────────┘
///        │
///        ▼
///   DataInstance (+ autoencoder batch)
/// ```

pub mod autoencoder;
pub mod classes;
pub mod indices;
pub mod instance;
pub mod nan;
pub mod nearest;
pub mod normalize;
pub mod window;

pub use classes::ClassIndex;
pub use instance::{DataInstance, SkipReason, TileOptions, TileOutput, process_tile};
pub use normalize::{NormalizingAccumulator, NormalizingDict, TileStats};
