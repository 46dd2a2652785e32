/// Data shaping utilities for the forecast harvester.
///
/// Fetching and file placement live elsewhere; this module only turns raw
/// API observations into the fixed-width rows written to disk.
///
/// Submodules:
/// - `series`: 168-hour forecast normalization and CSV row shaping.

pub mod series;
