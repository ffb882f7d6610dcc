use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::quality::QualityReport;

/// Series key used for the cross-collection aggregate.
pub const OVERALL_SERIES: &str = "overall";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub completeness: f64,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSeries {
    pub collection: String,
    pub points: Vec<TrendPoint>,
    /// Last minus first completeness in the window.
    pub completeness_change: f64,
    /// Last minus first error count in the window.
    pub error_change: i64,
}

impl TrendSeries {
    fn from_points(collection: &str, points: Vec<TrendPoint>) -> Self {
        let (completeness_change, error_change) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (
                ((last.completeness - first.completeness) * 100.0).round() / 100.0,
                signed(last.error_count) - signed(first.error_count),
            ),
            _ => (0.0, 0),
        };
        Self {
            collection: collection.to_string(),
            points,
            completeness_change,
            error_change,
        }
    }
}

fn signed(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendReport {
    InsufficientData {
        window_days: u32,
        reports_in_window: usize,
    },
    Available {
        window_days: u32,
        reports_in_window: usize,
        overall: TrendSeries,
        collections: Vec<TrendSeries>,
    },
}

/// Build completeness and error-count series from the reports generated in the
/// last `window_days`. Fewer than two reports is reported, never extrapolated.
/// A window reaching past the earliest representable date covers all history.
#[must_use]
pub fn compute_trends(
    history: &[QualityReport],
    now: OffsetDateTime,
    window_days: u32,
) -> TrendReport {
    let since = now.checked_sub(Duration::days(i64::from(window_days)));
    let mut in_window = history
        .iter()
        .filter(|report| match since {
            Some(since) => report.generated_at >= since,
            None => true,
        })
        .collect::<Vec<_>>();
    in_window.sort_by_key(|report| report.generated_at);

    if in_window.len() < 2 {
        return TrendReport::InsufficientData {
            window_days,
            reports_in_window: in_window.len(),
        };
    }

    let overall = TrendSeries::from_points(
        OVERALL_SERIES,
        in_window
            .iter()
            .map(|report| TrendPoint {
                at: report.generated_at,
                completeness: report.summary.average_completeness,
                error_count: report
                    .collections
                    .iter()
                    .map(|metrics| metrics.validation.error_count)
                    .sum(),
            })
            .collect(),
    );

    let names = in_window
        .iter()
        .flat_map(|report| report.collections.iter().map(|metrics| metrics.collection.clone()))
        .collect::<BTreeSet<_>>();
    let collections = names
        .into_iter()
        .map(|name| {
            let points = in_window
                .iter()
                .filter_map(|report| {
                    report.collection(&name).map(|metrics| TrendPoint {
                        at: report.generated_at,
                        completeness: metrics.completeness,
                        error_count: metrics.validation.error_count,
                    })
                })
                .collect();
            TrendSeries::from_points(&name, points)
        })
        .collect();

    TrendReport::Available {
        window_days,
        reports_in_window: in_window.len(),
        overall,
        collections,
    }
}
