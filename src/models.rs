use serde::{Deserialize, Serialize};

use crate::services::dataset::ColumnType;

/// Section toggles for a profiling pass. One options struct replaces the
/// per-variant checkbox wiring the dashboard grew over time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    pub include_outliers: bool,
    pub include_missing: bool,
    pub include_constants: bool,
    pub correlation: Option<CorrelationRequest>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            include_outliers: true,
            include_missing: true,
            include_constants: true,
            correlation: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationRequest {
    pub column_x: String,
    pub column_y: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeSummary {
    pub rows: usize,
    pub columns: usize,
    pub duplicate_rows: usize,
    pub memory_kb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: ColumnType,
    pub non_null_count: usize,
    pub null_count: usize,
    /// 0–100, rounded fraction scaled by 100 (round-then-scale contract).
    pub null_percent: f64,
    pub distinct_count: usize,
    pub memory_kb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierEntry {
    pub column: String,
    pub outlier_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub columns: Vec<OutlierEntry>,
    /// Set when more columns had outliers than the report lists.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingValueRow {
    pub column: String,
    pub missing_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingValueReport {
    /// True when the dataset has no missing values at all; `columns` is then
    /// empty.
    pub clean: bool,
    pub columns: Vec<MissingValueRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub column_x: String,
    pub column_y: String,
    pub coefficient: f64,
    pub p_value: f64,
    /// Paired non-null observations the test actually used.
    pub observations: usize,
}

/// The structured report the UI renders. Disabled sections serialize as
/// nothing rather than as empty lists.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub shape: ShapeSummary,
    pub columns: Vec<ColumnProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outliers: Option<OutlierReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingValueReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationResult>,
}
