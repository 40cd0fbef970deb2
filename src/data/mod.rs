/// Data layer: column tables, file loading and the baseline selection.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader  │  requested columns of one table → EventTable
///   └──────────┘
///        │
///        ▼
///   ┌────────────┐
///   │ EventTable │  scalar + per-event list columns, one row per event
///   └────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter  │  SelectionSpec → baseline event mask
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
