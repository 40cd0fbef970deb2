use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{Array, ArrayRef, AsArray, GenericListArray, OffsetSizeTrait};
use arrow::compute::cast;
use arrow::datatypes::{ArrowNativeType, DataType, FieldRef, Float64Type};
use log::debug;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Column, EventTable};
use crate::error::SelectionError;

/// Schema metadata key naming the table stored in a Parquet file.
pub const TABLE_NAME_KEY: &str = "table_name";

/// Extensions recognised as event tables.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["parquet", "pq", "json", "csv"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Read the requested columns of table `table_name` from one file.
/// Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – scalar and `List`/`LargeList` columns (recommended)
/// * `.json`    – `[{ "selCMet": 210.0, "rjr_Ms": [1800.0], ... }, ...]`,
///   optionally wrapped as `{ "<table_name>": [...] }`
/// * `.csv`     – list cells written as `[v1;v2;...]`
///
/// Requested columns absent from the file are simply not present in the
/// returned table. The file is closed before this function returns.
pub fn load_table(
    path: &Path,
    table_name: &str,
    columns: &BTreeSet<String>,
) -> Result<EventTable, SelectionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let loaded = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path, table_name, columns),
        "json" => load_json(path, table_name, columns),
        "csv" => load_csv(path, columns),
        other => Err(anyhow!("unsupported file extension: .{other}")),
    };

    let loaded = loaded.map_err(|e| SelectionError::file_access(path, format!("{e:#}")))?;
    debug!(
        "{}: read {} columns, {} missing",
        path.display(),
        loaded.len(),
        columns.len().saturating_sub(loaded.len())
    );
    EventTable::from_columns(path, loaded)
}

/// Expand a list of input paths. Files are kept as given; directories expand
/// to their sorted event-table files.
pub fn expand_input_paths<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();

    for input in inputs {
        let path = input.as_ref();
        if path.is_file() {
            expanded.push(path.to_path_buf());
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_supported_extension(p))
                .collect();
            if found.is_empty() {
                bail!("no event table files found in directory {}", path.display());
            }
            found.sort();
            log::info!("Found {} files in {}", found.len(), path.display());
            expanded.extend(found);
        } else {
            bail!("path does not exist: {}", path.display());
        }
    }

    Ok(expanded)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load the requested columns of a Parquet file.
///
/// Scalars may be Boolean, any integer, Float32 or Float64 and are promoted
/// to `f64`. Per-object columns are `List` or `LargeList` of any of those.
/// Only the requested columns that exist are decoded.
fn load_parquet(
    path: &Path,
    table_name: &str,
    wanted: &BTreeSet<String>,
) -> Result<BTreeMap<String, Column>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    if let Some(stored) = builder.schema().metadata().get(TABLE_NAME_KEY) {
        if stored != table_name {
            bail!("table '{table_name}' not found (file holds '{stored}')");
        }
    }

    let (indices, projected): (Vec<usize>, Vec<FieldRef>) = builder
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| wanted.contains(f.name()))
        .map(|(i, f)| (i, f.clone()))
        .unzip();
    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
    let reader = builder
        .with_projection(mask)
        .build()
        .context("building parquet reader")?;

    // Seeded from the schema so a file without row groups still has columns.
    let mut columns: BTreeMap<String, Column> = BTreeMap::new();
    for field in &projected {
        columns.insert(field.name().clone(), empty_column(field.data_type())?);
    }

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        for (idx, field) in schema.fields().iter().enumerate() {
            let column = arrow_to_column(batch.column(idx))
                .with_context(|| format!("column '{}'", field.name()))?;
            match columns.get_mut(field.name()) {
                Some(existing) => {
                    if !existing.append(column) {
                        bail!("column '{}' changes type between batches", field.name());
                    }
                }
                None => {
                    columns.insert(field.name().clone(), column);
                }
            }
        }
    }

    Ok(columns)
}

// -- Arrow helpers --

/// Convert one Arrow column into a [`Column`].
fn arrow_to_column(col: &ArrayRef) -> Result<Column> {
    match col.data_type() {
        DataType::List(_) => Ok(Column::Jagged(list_to_rows(col.as_list::<i32>())?)),
        DataType::LargeList(_) => Ok(Column::Jagged(list_to_rows(col.as_list::<i64>())?)),
        dt if dt.is_numeric() || *dt == DataType::Boolean => {
            let values = cast(col.as_ref(), &DataType::Float64)
                .with_context(|| format!("casting {dt:?} to Float64"))?;
            let values = values.as_primitive::<Float64Type>();
            Ok(Column::Scalar(
                values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
            ))
        }
        other => bail!("unsupported column type {other:?}"),
    }
}

/// Zero-row column of the kind `data_type` loads as.
fn empty_column(data_type: &DataType) -> Result<Column> {
    match data_type {
        DataType::List(_) | DataType::LargeList(_) => Ok(Column::Jagged(Vec::new())),
        dt if dt.is_numeric() || *dt == DataType::Boolean => Ok(Column::Scalar(Vec::new())),
        other => bail!("unsupported column type {other:?}"),
    }
}

/// Split a list column into one `Vec<f64>` per row. Null rows are empty.
fn list_to_rows<O: OffsetSizeTrait>(list: &GenericListArray<O>) -> Result<Vec<Vec<f64>>> {
    let inner = list.values();
    if !(inner.data_type().is_numeric() || *inner.data_type() == DataType::Boolean) {
        bail!("list inner type is {:?}, expected numbers", inner.data_type());
    }
    let values = cast(inner.as_ref(), &DataType::Float64).context("casting list values")?;
    let values = values.as_primitive::<Float64Type>();
    let offsets = list.value_offsets();

    Ok((0..list.len())
        .map(|row| {
            if list.is_null(row) {
                return Vec::new();
            }
            let start = offsets[row].as_usize();
            let end = offsets[row + 1].as_usize();
            (start..end)
                .map(|i| if values.is_null(i) { f64::NAN } else { values.value(i) })
                .collect()
        })
        .collect())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, one object per event):
///
/// ```json
/// [
///   { "selCMet": 210.0, "evtFillWgt": 0.5, "rjr_Ms": [1800.0], "HadronicSV_mass": [4.1, 7.2] },
///   ...
/// ]
/// ```
///
/// or the same array under the table name: `{ "kuSkimTree": [ ... ] }`.
fn load_json(
    path: &Path,
    table_name: &str,
    wanted: &BTreeSet<String>,
) -> Result<BTreeMap<String, Column>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = match &root {
        JsonValue::Array(records) => records,
        JsonValue::Object(tables) => tables
            .get(table_name)
            .with_context(|| format!("table '{table_name}' not found"))?
            .as_array()
            .with_context(|| format!("table '{table_name}' is not an array of events"))?,
        _ => bail!("expected a top-level JSON array or object"),
    };

    // Column kind is decided by the first event that carries the column.
    let mut kinds: BTreeMap<&str, bool> = BTreeMap::new();
    for rec in records {
        let obj = rec.as_object().context("event is not a JSON object")?;
        for (key, val) in obj {
            if wanted.contains(key) && !kinds.contains_key(key.as_str()) && !val.is_null() {
                kinds.insert(key.as_str(), val.is_array());
            }
        }
    }

    let mut columns = BTreeMap::new();
    for (name, is_list) in kinds {
        let column = if is_list {
            let rows = records
                .iter()
                .enumerate()
                .map(|(i, rec)| json_list(rec.get(name), i, name))
                .collect::<Result<Vec<_>>>()?;
            Column::Jagged(rows)
        } else {
            let rows = records
                .iter()
                .enumerate()
                .map(|(i, rec)| json_scalar(rec.get(name), i, name))
                .collect::<Result<Vec<_>>>()?;
            Column::Scalar(rows)
        };
        columns.insert(name.to_string(), column);
    }

    Ok(columns)
}

fn json_scalar(val: Option<&JsonValue>, row: usize, col: &str) -> Result<f64> {
    match val {
        None | Some(JsonValue::Null) => Ok(f64::NAN),
        Some(JsonValue::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(JsonValue::Number(n)) => n
            .as_f64()
            .with_context(|| format!("Row {row}, {col}: not representable as f64")),
        Some(other) => bail!("Row {row}, {col}: expected a number, got {other}"),
    }
}

fn json_list(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    match val {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(j, v)| json_scalar(Some(v), row, &format!("{col}[{j}]")))
            .collect(),
        Some(other) => bail!("Row {row}, {col}: expected an array, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one event per row.
/// Per-object columns hold bracketed, semicolon-separated lists:
///   `"[4.1;7.2]"`, `"[]"`
/// The kind of each column is decided by its first row.
fn load_csv(path: &Path, wanted: &BTreeSet<String>) -> Result<BTreeMap<String, Column>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let selected: Vec<(usize, &String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| wanted.contains(*h))
        .collect();

    let mut columns: BTreeMap<String, Column> = BTreeMap::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        for &(col_idx, name) in &selected {
            let cell = record.get(col_idx).unwrap_or("").trim();
            let column = columns.entry(name.clone()).or_insert_with(|| {
                if cell.starts_with('[') {
                    Column::Jagged(Vec::new())
                } else {
                    Column::Scalar(Vec::new())
                }
            });
            match column {
                Column::Jagged(rows) => rows.push(parse_csv_list(cell, row_no, name)?),
                Column::Scalar(rows) => rows.push(parse_csv_scalar(cell, row_no, name)?),
            }
        }
    }

    // Header-only file: the columns exist but hold no events.
    for (_, name) in selected {
        columns
            .entry(name.clone())
            .or_insert_with(|| Column::Scalar(Vec::new()));
    }

    Ok(columns)
}

fn parse_csv_scalar(s: &str, row: usize, col: &str) -> Result<f64> {
    match s {
        "" => Ok(f64::NAN),
        "true" => Ok(1.0),
        "false" => Ok(0.0),
        _ => s
            .parse::<f64>()
            .with_context(|| format!("Row {row}, {col}: '{s}' is not a number")),
    }
}

fn parse_csv_list(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    let inner = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .with_context(|| format!("Row {row}, {col}: '{s}' is not a [v1;v2;...] list"))?
        .trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(';')
        .enumerate()
        .map(|(j, tok)| parse_csv_scalar(tok.trim(), row, &format!("{col}[{j}]")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_cells() {
        assert_eq!(parse_csv_list("[1;2.5]", 0, "x").unwrap(), vec![1.0, 2.5]);
        assert!(parse_csv_list("[]", 0, "x").unwrap().is_empty());
        assert!(parse_csv_list("1;2", 0, "x").is_err());
        assert_eq!(parse_csv_scalar("true", 0, "f").unwrap(), 1.0);
        assert!(parse_csv_scalar("", 0, "f").unwrap().is_nan());
        assert!(parse_csv_scalar("abc", 0, "f").is_err());
    }

    #[test]
    fn json_cells() {
        let v: JsonValue = serde_json::json!([1, 2.5, true]);
        assert_eq!(json_list(Some(&v), 0, "x").unwrap(), vec![1.0, 2.5, 1.0]);
        assert!(json_list(None, 0, "x").unwrap().is_empty());
        assert!(json_scalar(Some(&serde_json::json!("a")), 0, "x").is_err());
    }

    #[test]
    fn unknown_extension_is_file_access_error() {
        let wanted = BTreeSet::from(["selCMet".to_string()]);
        let err = load_table(Path::new("events.root"), "kuSkimTree", &wanted).unwrap_err();
        assert!(matches!(err, SelectionError::FileAccess { .. }));
    }
}
