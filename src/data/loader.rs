use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use chrono::NaiveDate;
use ndarray::Array3;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::model::{LabelRecord, LabelTable, RasterTimeSeries};

// ---------------------------------------------------------------------------
// Label tables
// ---------------------------------------------------------------------------

/// Load a label table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.geojson` / `.json` – FeatureCollection with `lat`, `lon`, `crop_type`
///   properties (or a Point geometry), or a plain array of records
/// * `.csv`     – columns `lat`, `lon`, `crop_type` (empty crop → null)
/// * `.parquet` – float `lat` / `lon` columns and a string `crop_type` column
pub fn load_labels(path: &Path) -> Result<LabelTable> {
    match extension(path).as_str() {
        "geojson" | "json" => load_labels_json(path),
        "csv" => load_labels_csv(path),
        "parquet" | "pq" => load_labels_parquet(path),
        other => bail!("Unsupported label file extension: .{other}"),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Expected JSON schema, as written by `GeoDataFrame.to_file(driver="GeoJSON")`:
///
/// ```json
/// {
///   "type": "FeatureCollection",
///   "features": [
///     {
///       "type": "Feature",
///       "properties": { "lat": 0.52, "lon": 34.61, "crop_type": "maize" },
///       "geometry": { "type": "Point", "coordinates": [34.61, 0.52] }
///     }
///   ]
/// }
/// ```
fn load_labels_json(path: &Path) -> Result<LabelTable> {
    let text = std::fs::read_to_string(path).context("reading label file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let mut records = Vec::new();
    if let Some(features) = root.get("features") {
        let features = features
            .as_array()
            .context("'features' is not an array")?;
        for (i, feature) in features.iter().enumerate() {
            let empty = JsonMap::new();
            let props = match feature.get("properties") {
                Some(JsonValue::Object(obj)) => obj,
                Some(JsonValue::Null) | None => &empty,
                Some(_) => bail!("Feature {i}: 'properties' is not an object"),
            };
            records.push(label_from_object(props, feature.get("geometry"), i)?);
        }
    } else {
        let rows = root
            .as_array()
            .context("Expected a FeatureCollection or a top-level JSON array")?;
        for (i, row) in rows.iter().enumerate() {
            let obj = row
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;
            records.push(label_from_object(obj, None, i)?);
        }
    }

    Ok(LabelTable::from_records(records))
}

fn label_from_object(
    obj: &JsonMap<String, JsonValue>,
    geometry: Option<&JsonValue>,
    row: usize,
) -> Result<LabelRecord> {
    let point = geometry.and_then(point_coordinates);

    let lat = match obj.get("lat").and_then(JsonValue::as_f64) {
        Some(lat) => lat,
        None => point
            .map(|(_, lat)| lat)
            .with_context(|| format!("Row {row}: no 'lat' property and no Point geometry"))?,
    };
    let lon = match obj.get("lon").and_then(JsonValue::as_f64) {
        Some(lon) => lon,
        None => point
            .map(|(lon, _)| lon)
            .with_context(|| format!("Row {row}: no 'lon' property and no Point geometry"))?,
    };

    let crop_type = match obj.get("crop_type") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok(LabelRecord {
        lat,
        lon,
        crop_type,
    })
}

/// `(lon, lat)` of a GeoJSON Point.
fn point_coordinates(geometry: &JsonValue) -> Option<(f64, f64)> {
    if geometry.get("type")?.as_str()? != "Point" {
        return None;
    }
    let coords = geometry.get("coordinates")?.as_array()?;
    Some((coords.first()?.as_f64()?, coords.get(1)?.as_f64()?))
}

/// CSV layout:  header row with at least `lat`, `lon` and `crop_type`.
/// Extra columns are ignored.
fn load_labels_csv(path: &Path) -> Result<LabelTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers = reader.headers().context("reading CSV headers")?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CSV missing '{name}' column"))
    };
    let lat_idx = column("lat")?;
    let lon_idx = column("lon")?;
    let crop_idx = column("crop_type")?;

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let parse = |idx: usize, col: &str| -> Result<f64> {
            let tok = record.get(idx).unwrap_or("").trim();
            tok.parse::<f64>()
                .with_context(|| format!("Row {row_no}, {col}: '{tok}' is not a number"))
        };
        let crop_type = record
            .get(crop_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        records.push(LabelRecord {
            lat: parse(lat_idx, "lat")?,
            lon: parse(lon_idx, "lon")?,
            crop_type,
        });
    }

    Ok(LabelTable::from_records(records))
}

fn load_labels_parquet(path: &Path) -> Result<LabelTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
        };
        let lat_col = column("lat")?;
        let lon_col = column("lon")?;
        let crop_col = column("crop_type")?;

        for row in 0..batch.num_rows() {
            records.push(LabelRecord {
                lat: extract_f64(lat_col, row).with_context(|| format!("Row {row}: 'lat'"))?,
                lon: extract_f64(lon_col, row).with_context(|| format!("Row {row}: 'lon'"))?,
                crop_type: extract_string(crop_col, row)
                    .with_context(|| format!("Row {row}: 'crop_type'"))?,
            });
        }
    }

    Ok(LabelTable::from_records(records))
}

// ---------------------------------------------------------------------------
// Raster tiles
// ---------------------------------------------------------------------------

/// Turns a tile path into a gridded time series.
pub trait RasterLoader {
    fn load(
        &self,
        path: &Path,
        start_date: NaiveDate,
        days_per_timestep: u32,
    ) -> crate::error::Result<RasterTimeSeries>;
}

/// Reads tiles exported as one row per cell.
///
/// * `.parquet` – columns `x` (lon), `y` (lat) and `values`, a List of
///   `timesteps * n_bands` floats in time-major order
/// * `.json`    – `{ "x": [...], "y": [...], "values": [[[...]]] }` with
///   `values[x_idx][y_idx]` holding the same flattened series
///
/// Parquet cells missing from the file, and null values, become NaN.
#[derive(Debug, Clone)]
pub struct FileRasterLoader {
    pub n_bands: usize,
}

impl FileRasterLoader {
    pub fn new(n_bands: usize) -> Self {
        FileRasterLoader { n_bands }
    }
}

impl RasterLoader for FileRasterLoader {
    fn load(
        &self,
        path: &Path,
        start_date: NaiveDate,
        days_per_timestep: u32,
    ) -> crate::error::Result<RasterTimeSeries> {
        let tile = match extension(path).as_str() {
            "parquet" | "pq" => load_tile_parquet(path, self.n_bands),
            "json" => load_tile_json(path, self.n_bands),
            other => Err(anyhow::anyhow!("Unsupported tile extension: .{other}")),
        }
        .with_context(|| format!("loading tile {}", path.display()))?;
        Ok(tile.with_time_axis(start_date, days_per_timestep))
    }
}

fn load_tile_json(path: &Path, n_bands: usize) -> Result<RasterTimeSeries> {
    let text = std::fs::read_to_string(path).context("reading tile")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let coords = |name: &str| -> Result<Vec<f64>> {
        root.get(name)
            .and_then(JsonValue::as_array)
            .with_context(|| format!("missing or invalid '{name}' array"))?
            .iter()
            .enumerate()
            .map(|(j, v)| v.as_f64().with_context(|| format!("{name}[{j}]: not a number")))
            .collect()
    };
    let x = coords("x")?;
    let y = coords("y")?;

    let columns = root
        .get("values")
        .and_then(JsonValue::as_array)
        .context("missing or invalid 'values' array")?;
    if columns.len() != x.len() {
        bail!("'values' has {} columns but x has {}", columns.len(), x.len());
    }

    let mut depth = None;
    let mut flat = Vec::new();
    for (xi, column) in columns.iter().enumerate() {
        let cells = column
            .as_array()
            .with_context(|| format!("values[{xi}] is not an array"))?;
        if cells.len() != y.len() {
            bail!("values[{xi}] has {} rows but y has {}", cells.len(), y.len());
        }
        for (yi, cell) in cells.iter().enumerate() {
            let series = cell
                .as_array()
                .with_context(|| format!("values[{xi}][{yi}] is not an array"))?;
            match depth {
                None => depth = Some(series.len()),
                Some(d) if d != series.len() => {
                    bail!("values[{xi}][{yi}] has {} entries, expected {d}", series.len())
                }
                Some(_) => {}
            }
            // null (and anything non-numeric) is a missing observation
            flat.extend(series.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)));
        }
    }

    let values = Array3::from_shape_vec((x.len(), y.len(), depth.unwrap_or(0)), flat)
        .context("assembling value grid")?;
    Ok(RasterTimeSeries::new(x, y, values, n_bands)?)
}

fn load_tile_parquet(path: &Path, n_bands: usize) -> Result<RasterTimeSeries> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut cells: Vec<(f64, f64, Vec<f64>)> = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
        };
        let x_col = column("x")?;
        let y_col = column("y")?;
        let values_col = column("values")?;

        for row in 0..batch.num_rows() {
            let x = extract_f64(x_col, row).with_context(|| format!("Row {row}: 'x'"))?;
            let y = extract_f64(y_col, row).with_context(|| format!("Row {row}: 'y'"))?;
            let series = extract_f64_list(values_col, row)
                .with_context(|| format!("Row {row}: failed to read 'values'"))?;
            cells.push((x, y, series));
        }
    }

    assemble_grid(cells, n_bands)
}

/// Place long-format cells on a grid: longitudes ascending, latitudes
/// descending (north-up).
fn assemble_grid(cells: Vec<(f64, f64, Vec<f64>)>, n_bands: usize) -> Result<RasterTimeSeries> {
    let mut xs: Vec<f64> = cells.iter().map(|c| c.0).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    let mut ys: Vec<f64> = cells.iter().map(|c| c.1).collect();
    ys.sort_by(|a, b| b.total_cmp(a));
    ys.dedup();

    let depth = cells.first().map_or(0, |c| c.2.len());
    let mut values = Array3::from_elem((xs.len(), ys.len(), depth), f64::NAN);
    for (x, y, series) in cells {
        if series.len() != depth {
            bail!(
                "cell ({x}, {y}) has {} values, expected {depth}",
                series.len()
            );
        }
        let xi = xs
            .binary_search_by(|v| v.total_cmp(&x))
            .map_err(|_| anyhow::anyhow!("longitude {x} not on grid"))?;
        let yi = ys
            .binary_search_by(|v| y.total_cmp(v))
            .map_err(|_| anyhow::anyhow!("latitude {y} not on grid"))?;
        for (k, v) in series.into_iter().enumerate() {
            values[[xi, yi, k]] = v;
        }
    }

    Ok(RasterTimeSeries::new(xs, ys, values, n_bands)?)
}

// -- Parquet / Arrow helpers --

/// A coordinate value. Nulls are an error since no tile could match them.
fn extract_f64(col: &Arc<dyn Array>, row: usize) -> Result<f64> {
    if col.is_null(row) {
        bail!("null coordinate");
    }
    if let Some(arr) = col.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.value(row))
    } else if let Some(arr) = col.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.value(row) as f64)
    } else {
        bail!("Expected Float64 or Float32 column, got {:?}", col.data_type())
    }
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<Option<String>> {
    if col.is_null(row) {
        return Ok(None);
    }
    match col.data_type() {
        DataType::Utf8 => {
            let s = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(Some(s.value(row).to_string()))
        }
        DataType::LargeUtf8 => Ok(Some(col.as_string::<i64>().value(row).to_string())),
        other => bail!("Expected string column, got {other:?}"),
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}
