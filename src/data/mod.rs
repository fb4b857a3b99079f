/// Data layer: core types, loading, and label filtering.
///
/// Architecture:
/// ```text
///  .geojson / .csv / .parquet        .parquet / .json tiles
///        │                                  │
///        ▼                                  ▼
///   ┌──────────┐                    ┌──────────────────┐
///   │  loader   │  → LabelTable      │ FileRasterLoader  │ → RasterTimeSeries
///   └──────────┘                    └──────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  labels inside a tile's bounding box → selected label
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
