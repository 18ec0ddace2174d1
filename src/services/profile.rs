use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::AppError;
use crate::models::{
    ColumnProfile, CorrelationResult, MissingValueReport, MissingValueRow, OutlierEntry,
    OutlierReport, ProfileOptions, ProfileReport, ShapeSummary,
};
use crate::services::dataset::{Cell, ColumnType, TabularDataset};

/// Outlier columns listed before the report truncates.
const OUTLIER_REPORT_LIMIT: usize = 5;
const IQR_FENCE_FACTOR: f64 = 1.5;

/// Runs the full report battery over a dataset. Every section is a pure,
/// read-only projection; the only fallible path is a requested correlation,
/// which can be a usage error.
pub fn profile(dataset: &TabularDataset, options: &ProfileOptions) -> Result<ProfileReport, AppError> {
    let shape = shape_summary(dataset);
    let columns = column_profiles(dataset);
    let outliers = options.include_outliers.then(|| outlier_scan(dataset));
    let missing = options.include_missing.then(|| missing_value_report(dataset));
    let constant_columns = options.include_constants.then(|| constant_columns(dataset));
    let correlation = match &options.correlation {
        Some(request) => Some(correlation_test(
            dataset,
            &request.column_x,
            &request.column_y,
        )?),
        None => None,
    };
    Ok(ProfileReport {
        shape,
        columns,
        outliers,
        missing,
        constant_columns,
        correlation,
    })
}

pub fn shape_summary(dataset: &TabularDataset) -> ShapeSummary {
    let memory_bytes: usize = dataset.columns().iter().map(|c| c.memory_bytes()).sum();
    ShapeSummary {
        rows: dataset.row_count(),
        columns: dataset.column_count(),
        duplicate_rows: duplicate_row_count(dataset),
        memory_kb: round2(memory_bytes as f64 / 1024.0),
    }
}

/// Rows equal to an earlier row across every column. A zero-row or
/// zero-column dataset has no duplicates.
fn duplicate_row_count(dataset: &TabularDataset) -> usize {
    if dataset.row_count() == 0 || dataset.column_count() == 0 {
        return 0;
    }
    let mut seen = HashSet::with_capacity(dataset.row_count());
    let mut duplicates = 0;
    for row in 0..dataset.row_count() {
        let mut key = Vec::new();
        for column in dataset.columns() {
            column.cells()[row].write_key(&mut key);
        }
        if !seen.insert(key) {
            duplicates += 1;
        }
    }
    duplicates
}

pub fn column_profiles(dataset: &TabularDataset) -> Vec<ColumnProfile> {
    let rows = dataset.row_count();
    dataset
        .columns()
        .par_iter()
        .map(|column| {
            let null_count = column.null_count();
            ColumnProfile {
                name: column.name().to_string(),
                data_type: column.dtype(),
                non_null_count: rows - null_count,
                null_count,
                null_percent: null_percent(null_count, rows),
                distinct_count: column.distinct_non_null(),
                memory_kb: round2(column.memory_bytes() as f64 / 1024.0),
            }
        })
        .collect()
}

/// Round-then-scale, deliberately: the fraction is rounded to two decimals
/// before the percent scaling, so 1 null in 200 rows reports 1.0, not 0.5.
/// Consumers of the original figures depend on this ordering.
fn null_percent(null_count: usize, rows: usize) -> f64 {
    if rows == 0 {
        return 0.0;
    }
    round2(null_count as f64 / rows as f64) * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Counts values outside the 1.5×IQR fences per numeric column. Columns
/// without outliers are omitted; the list truncates past the report limit.
pub fn outlier_scan(dataset: &TabularDataset) -> OutlierReport {
    let mut entries = Vec::new();
    let mut truncated = false;
    for column in dataset.columns() {
        if column.dtype() != ColumnType::Numeric {
            continue;
        }
        let mut values = column.numeric_values();
        if values.is_empty() {
            continue;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let q1 = quantile(&values, 0.25);
        let q3 = quantile(&values, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - IQR_FENCE_FACTOR * iqr;
        let upper = q3 + IQR_FENCE_FACTOR * iqr;
        let outlier_count = values.iter().filter(|&&v| v < lower || v > upper).count();
        if outlier_count == 0 {
            continue;
        }
        if entries.len() == OUTLIER_REPORT_LIMIT {
            truncated = true;
            break;
        }
        entries.push(OutlierEntry {
            column: column.name().to_string(),
            outlier_count,
        });
    }
    OutlierReport {
        columns: entries,
        truncated,
    }
}

/// Linearly interpolated quantile over pre-sorted values, the same scheme
/// dataframe libraries default to.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let position = q * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        sorted[low] + (position - low as f64) * (sorted[high] - sorted[low])
    }
}

pub fn missing_value_report(dataset: &TabularDataset) -> MissingValueReport {
    let columns: Vec<MissingValueRow> = dataset
        .columns()
        .iter()
        .filter_map(|column| {
            let missing_count = column.null_count();
            (missing_count > 0).then(|| MissingValueRow {
                column: column.name().to_string(),
                missing_count,
            })
        })
        .collect();
    MissingValueReport {
        clean: columns.is_empty(),
        columns,
    }
}

/// Columns with at most one distinct non-null value, the all-null case
/// included.
pub fn constant_columns(dataset: &TabularDataset) -> Vec<String> {
    dataset
        .columns()
        .iter()
        .filter(|column| column.distinct_non_null() <= 1)
        .map(|column| column.name().to_string())
        .collect()
}

/// Pearson correlation with a two-tailed p-value under the zero-correlation
/// null. Rows where either side is missing are dropped pairwise.
pub fn correlation_test(
    dataset: &TabularDataset,
    column_x: &str,
    column_y: &str,
) -> Result<CorrelationResult, AppError> {
    if column_x == column_y {
        return Err(AppError::Usage(
            "correlation requires two distinct columns".to_string(),
        ));
    }
    if dataset.numeric_column_count() < 2 {
        return Err(AppError::Usage(
            "correlation requires at least 2 numeric columns in the dataset".to_string(),
        ));
    }
    let x = numeric_column(dataset, column_x)?;
    let y = numeric_column(dataset, column_y)?;

    let pairs: Vec<(f64, f64)> = x
        .cells()
        .iter()
        .zip(y.cells())
        .filter_map(|cells| match cells {
            (Cell::Numeric(a), Cell::Numeric(b)) if !a.is_nan() && !b.is_nan() => Some((*a, *b)),
            _ => None,
        })
        .collect();
    let n = pairs.len();
    if n < 2 {
        return Err(AppError::Usage(format!(
            "correlation between '{column_x}' and '{column_y}' needs at least 2 paired observations, found {n}"
        )));
    }

    let nf = n as f64;
    let sum_x: f64 = pairs.iter().map(|(a, _)| a).sum();
    let sum_y: f64 = pairs.iter().map(|(_, b)| b).sum();
    let sum_xy: f64 = pairs.iter().map(|(a, b)| a * b).sum();
    let sum_x2: f64 = pairs.iter().map(|(a, _)| a * a).sum();
    let sum_y2: f64 = pairs.iter().map(|(_, b)| b * b).sum();

    let numerator = nf * sum_xy - sum_x * sum_y;
    let denominator = ((nf * sum_x2 - sum_x * sum_x) * (nf * sum_y2 - sum_y * sum_y)).sqrt();
    if denominator == 0.0 {
        return Err(AppError::Usage(format!(
            "correlation between '{column_x}' and '{column_y}' is undefined: one side has zero variance"
        )));
    }
    let coefficient = (numerator / denominator).clamp(-1.0, 1.0);
    let p_value = two_tailed_p_value(coefficient, n)?;

    Ok(CorrelationResult {
        column_x: column_x.to_string(),
        column_y: column_y.to_string(),
        coefficient,
        p_value,
        observations: n,
    })
}

fn numeric_column<'a>(
    dataset: &'a TabularDataset,
    name: &str,
) -> Result<&'a crate::services::dataset::Column, AppError> {
    let column = dataset
        .column(name)
        .ok_or_else(|| AppError::Usage(format!("column '{name}' not found in dataset")))?;
    if column.dtype() != ColumnType::Numeric {
        return Err(AppError::Usage(format!("column '{name}' is not numeric")));
    }
    Ok(column)
}

/// Student-t transform of r. With two observations the fit is fully
/// determined (zero degrees of freedom), reported as p = 1.0; a numerically
/// perfect correlation reports p = 0.0.
fn two_tailed_p_value(r: f64, n: usize) -> Result<f64, AppError> {
    if n <= 2 {
        return Ok(1.0);
    }
    let r2_complement = 1.0 - r * r;
    if r2_complement <= f64::EPSILON {
        return Ok(0.0);
    }
    let dof = (n - 2) as f64;
    let t = r * (dof / r2_complement).sqrt();
    let dist = StudentsT::new(0.0, 1.0, dof)
        .map_err(|e| AppError::Internal(format!("t distribution setup failed: {e}")))?;
    Ok((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CorrelationRequest;
    use crate::services::dataset::{Cell, Column, ColumnType, TabularDataset};

    fn numeric(name: &str, values: &[Option<f64>]) -> Column {
        let cells = values
            .iter()
            .map(|v| v.map(Cell::Numeric).unwrap_or(Cell::Null))
            .collect();
        Column::new(name, ColumnType::Numeric, cells)
    }

    fn text(name: &str, values: &[Option<&str>]) -> Column {
        let cells = values
            .iter()
            .map(|v| v.map(|s| Cell::Text(s.to_string())).unwrap_or(Cell::Null))
            .collect();
        Column::new(name, ColumnType::Text, cells)
    }

    fn options() -> ProfileOptions {
        ProfileOptions::default()
    }

    #[test]
    fn shape_matches_dataset_dimensions() {
        let ds = TabularDataset::new(vec![
            numeric("a", &[Some(1.0), Some(2.0), Some(3.0)]),
            text("b", &[Some("x"), Some("y"), None]),
        ]);
        let report = profile(&ds, &options()).unwrap();
        assert_eq!(report.shape.rows, 3);
        assert_eq!(report.shape.columns, 2);
        assert!(report.shape.memory_kb > 0.0);
    }

    #[test]
    fn zero_row_dataset_profiles_cleanly() {
        let ds = TabularDataset::new(vec![numeric("a", &[]), text("b", &[])]);
        let report = profile(&ds, &options()).unwrap();
        assert_eq!(report.shape.rows, 0);
        assert_eq!(report.shape.columns, 2);
        assert_eq!(report.shape.duplicate_rows, 0);
        assert!(report.missing.as_ref().unwrap().clean);
        assert_eq!(report.columns[0].null_percent, 0.0);
    }

    #[test]
    fn duplicate_rows_count_all_but_first_occurrence() {
        let ds = TabularDataset::new(vec![
            numeric("a", &[Some(1.0), Some(1.0), Some(1.0), Some(2.0)]),
            text("b", &[Some("x"), Some("x"), Some("y"), Some("x")]),
        ]);
        let shape = shape_summary(&ds);
        assert_eq!(shape.duplicate_rows, 1);
    }

    #[test]
    fn duplicate_detection_ignores_the_zero_sign() {
        let ds = TabularDataset::new(vec![numeric("a", &[Some(0.0), Some(-0.0)])]);
        let shape = shape_summary(&ds);
        assert_eq!(shape.duplicate_rows, 1);
    }

    #[test]
    fn null_percent_rounds_the_fraction_before_scaling() {
        // 1 null in 200 rows: fraction 0.005 rounds to 0.01, reported as 1.0,
        // not 0.5.
        let mut values = vec![Some(1.0); 199];
        values.push(None);
        let ds = TabularDataset::new(vec![numeric("a", &values)]);
        let profiles = column_profiles(&ds);
        assert!((profiles[0].null_percent - 1.0).abs() < 1e-9);
        assert_eq!(profiles[0].null_count, 1);
        assert_eq!(profiles[0].non_null_count, 199);
    }

    #[test]
    fn outlier_count_is_invariant_under_row_permutation() {
        let forward: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0, 5.0, 100.0]
            .iter()
            .map(|v| Some(*v))
            .collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let scan_a = outlier_scan(&TabularDataset::new(vec![numeric("v", &forward)]));
        let scan_b = outlier_scan(&TabularDataset::new(vec![numeric("v", &reversed)]));
        assert_eq!(scan_a.columns.len(), 1);
        assert_eq!(scan_a.columns[0].outlier_count, scan_b.columns[0].outlier_count);
        assert_eq!(scan_a.columns[0].outlier_count, 1);
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&values, 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&values, 0.75) - 3.25).abs() < 1e-12);
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn clean_columns_are_omitted_from_the_outlier_report() {
        let ds = TabularDataset::new(vec![
            numeric("steady", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
            numeric("spiky", &[Some(1.0), Some(1.0), Some(1.0), Some(50.0)]),
        ]);
        let scan = outlier_scan(&ds);
        assert_eq!(scan.columns.len(), 1);
        assert_eq!(scan.columns[0].column, "spiky");
        assert!(!scan.truncated);
    }

    #[test]
    fn outlier_report_truncates_past_five_columns() {
        let spiky: Vec<Option<f64>> = [1.0, 1.0, 1.0, 1.0, 80.0].iter().map(|v| Some(*v)).collect();
        let columns: Vec<Column> = (0..7).map(|i| numeric(&format!("c{i}"), &spiky)).collect();
        let scan = outlier_scan(&TabularDataset::new(columns));
        assert_eq!(scan.columns.len(), 5);
        assert!(scan.truncated);
    }

    #[test]
    fn missing_report_signals_clean_or_lists_offenders() {
        let clean = TabularDataset::new(vec![numeric("a", &[Some(1.0), Some(2.0)])]);
        assert!(missing_value_report(&clean).clean);

        let dirty = TabularDataset::new(vec![
            numeric("a", &[Some(1.0), None]),
            numeric("b", &[Some(1.0), Some(2.0)]),
        ]);
        let report = missing_value_report(&dirty);
        assert!(!report.clean);
        assert_eq!(report.columns.len(), 1);
        assert_eq!(report.columns[0].column, "a");
        assert_eq!(report.columns[0].missing_count, 1);
    }

    #[test]
    fn constant_detection_covers_all_null_and_single_value() {
        let ds = TabularDataset::new(vec![
            numeric("all_null", &[None, None, None]),
            numeric("single", &[Some(7.0), Some(7.0), Some(7.0)]),
            numeric("varied", &[Some(1.0), Some(2.0), Some(1.0)]),
        ]);
        let constants = constant_columns(&ds);
        assert_eq!(constants, vec!["all_null".to_string(), "single".to_string()]);
    }

    #[test]
    fn perfectly_linear_columns_correlate_at_one() {
        let ds = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]),
            numeric("y", &[Some(2.0), Some(4.0), Some(6.0), Some(8.0), Some(10.0)]),
        ]);
        let result = correlation_test(&ds, "x", "y").unwrap();
        assert!((result.coefficient - 1.0).abs() < 1e-9);
        assert!(result.p_value < 1e-9);
        assert_eq!(result.observations, 5);
    }

    #[test]
    fn correlation_drops_null_pairs_pairwise() {
        let ds = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), None, Some(3.0), Some(4.0)]),
            numeric("y", &[Some(2.0), Some(9.0), None, Some(8.0)]),
        ]);
        let result = correlation_test(&ds, "x", "y").unwrap();
        assert_eq!(result.observations, 2);
    }

    #[test]
    fn imperfect_correlation_has_a_nonzero_p_value() {
        let ds = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]),
            numeric("y", &[Some(2.0), Some(1.0), Some(4.0), Some(3.0), Some(5.0)]),
        ]);
        let result = correlation_test(&ds, "x", "y").unwrap();
        assert!(result.coefficient > 0.0 && result.coefficient < 1.0);
        assert!(result.p_value > 0.0 && result.p_value < 1.0);
    }

    #[test]
    fn correlation_usage_errors_are_structured() {
        let ds = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), Some(2.0)]),
            numeric("y", &[Some(2.0), Some(4.0)]),
        ]);
        assert!(matches!(
            correlation_test(&ds, "x", "x").unwrap_err(),
            AppError::Usage(_)
        ));
        assert!(matches!(
            correlation_test(&ds, "x", "missing").unwrap_err(),
            AppError::Usage(_)
        ));

        let sparse = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), None]),
            numeric("y", &[None, Some(2.0)]),
        ]);
        assert!(matches!(
            correlation_test(&sparse, "x", "y").unwrap_err(),
            AppError::Usage(_)
        ));

        let lone = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), Some(2.0)]),
            text("label", &[Some("a"), Some("b")]),
        ]);
        assert!(matches!(
            correlation_test(&lone, "x", "label").unwrap_err(),
            AppError::Usage(_)
        ));
    }

    #[test]
    fn profile_honors_section_toggles() {
        let ds = TabularDataset::new(vec![
            numeric("x", &[Some(1.0), Some(2.0)]),
            numeric("y", &[Some(2.0), Some(4.0)]),
        ]);
        let opts = ProfileOptions {
            include_outliers: false,
            include_missing: false,
            include_constants: false,
            correlation: None,
        };
        let report = profile(&ds, &opts).unwrap();
        assert!(report.outliers.is_none());
        assert!(report.missing.is_none());
        assert!(report.constant_columns.is_none());
        assert!(report.correlation.is_none());

        let opts = ProfileOptions {
            correlation: Some(CorrelationRequest {
                column_x: "x".to_string(),
                column_y: "y".to_string(),
            }),
            ..ProfileOptions::default()
        };
        let report = profile(&ds, &opts).unwrap();
        assert!(report.correlation.is_some());
    }
}
