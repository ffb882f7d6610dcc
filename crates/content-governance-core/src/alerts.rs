use serde::{Deserialize, Serialize};

use crate::consistency::ConsistencyReport;
use crate::quality::QualityReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    /// Overall completeness below this percentage is critical.
    pub critical_completeness: f64,
    /// Per-collection completeness below this percentage is a warning.
    pub warning_completeness: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_completeness: 80.0,
            warning_completeness: 70.0,
        }
    }
}

/// Derive alerts from a report. Alerts are never stored on their own, so they
/// always agree with the report they were computed from.
#[must_use]
pub fn derive_alerts(
    report: &QualityReport,
    consistency: Option<&ConsistencyReport>,
    thresholds: &AlertThresholds,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if !report.collections.is_empty()
        && report.summary.average_completeness < thresholds.critical_completeness
    {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            collection: None,
            message: format!(
                "overall completeness {:.2}% is below {:.0}%",
                report.summary.average_completeness, thresholds.critical_completeness
            ),
        });
    }

    for metrics in &report.collections {
        if let Some(error) = &metrics.load_error {
            alerts.push(Alert {
                level: AlertLevel::Error,
                collection: Some(metrics.collection.clone()),
                message: format!("collection could not be loaded: {error}"),
            });
            continue;
        }
        if metrics.validation.error_count > 0 {
            alerts.push(Alert {
                level: AlertLevel::Error,
                collection: Some(metrics.collection.clone()),
                message: format!("{} validation error(s)", metrics.validation.error_count),
            });
        }
        if metrics.completeness < thresholds.warning_completeness {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                collection: Some(metrics.collection.clone()),
                message: format!(
                    "completeness {:.2}% is below {:.0}%",
                    metrics.completeness, thresholds.warning_completeness
                ),
            });
        }
    }

    if let Some(consistency) = consistency {
        for check in consistency.checks.iter().filter(|check| !check.passed) {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                collection: None,
                message: format!("consistency check `{}` failed: {}", check.name, check.details),
            });
        }
    }

    alerts.sort_by(|lhs, rhs| rhs.level.cmp(&lhs.level));
    alerts
}
