//! Year-over-year growth of canonical KPIs.
//!
//! "CAGR" here is the single-period growth between `N-1` and `N`, which is what the report
//! shows next to each KPI. There is no multi-period compounding.

use crate::registry::{CanonicalKpiSet, CHIFFRE_D_AFFAIRES};
use crate::resolver::KpiResolver;
use crate::utils::finite;
use crate::years::YearToken;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `((current / previous) - 1) * 100`, or `None` unless both values are finite and the
/// previous one is non-zero.
pub fn growth_rate(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = current.and_then(finite)?;
    let previous = previous.and_then(finite).filter(|p| *p != 0.0)?;
    finite((current / previous - 1.0) * 100.0)
}

/// Growth of `key` from `N-1` to `N`.
pub fn cagr(resolver: &KpiResolver<'_>, key: &str) -> Option<f64> {
    growth_rate(
        resolver.resolve(key, YearToken::CURRENT),
        resolver.resolve(key, YearToken::PREVIOUS),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrowthNarrative {
    Stability { rate: f64 },
    Growth { rate: f64 },
    Contraction { rate: f64 },
    /// Current period known, prior period missing or zero.
    GrowthPriorUnavailable,
    /// Prior period known, current period missing.
    ContractionCurrentUnavailable,
    InsufficientData,
}

impl GrowthNarrative {
    pub fn classify(current: Option<f64>, previous: Option<f64>, stability_threshold: f64) -> Self {
        let current = current.and_then(finite);
        let previous = previous.and_then(finite);

        match (current, previous) {
            (Some(_), Some(_)) => match growth_rate(current, previous) {
                Some(rate) if rate == 0.0 || rate.abs() < stability_threshold => {
                    Self::Stability { rate }
                }
                Some(rate) if rate > 0.0 => Self::Growth { rate },
                Some(rate) => Self::Contraction { rate },
                None => Self::GrowthPriorUnavailable,
            },
            (Some(_), None) => Self::GrowthPriorUnavailable,
            (None, Some(_)) => Self::ContractionCurrentUnavailable,
            (None, None) => Self::InsufficientData,
        }
    }

    pub fn for_kpi(resolver: &KpiResolver<'_>, key: &str, stability_threshold: f64) -> Self {
        Self::classify(
            resolver.resolve(key, YearToken::CURRENT),
            resolver.resolve(key, YearToken::PREVIOUS),
            stability_threshold,
        )
    }

    pub fn revenue(resolver: &KpiResolver<'_>, stability_threshold: f64) -> Self {
        Self::for_kpi(resolver, CHIFFRE_D_AFFAIRES, stability_threshold)
    }

    pub fn rate(&self) -> Option<f64> {
        match *self {
            Self::Stability { rate } | Self::Growth { rate } | Self::Contraction { rate } => {
                Some(rate)
            }
            _ => None,
        }
    }
}

impl fmt::Display for GrowthNarrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stability { rate } => write!(f, "Stable ({:+.1}%)", rate),
            Self::Growth { rate } => write!(f, "Growth of {:+.1}% over the prior year", rate),
            Self::Contraction { rate } => {
                write!(f, "Contraction of {:+.1}% over the prior year", rate)
            }
            Self::GrowthPriorUnavailable => write!(f, "Growth (prior year unavailable)"),
            Self::ContractionCurrentUnavailable => {
                write!(f, "Contraction (current year unavailable)")
            }
            Self::InsufficientData => write!(f, "Insufficient data to assess the trend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearValue {
    pub token: YearToken,
    /// Absolute year when known, otherwise the symbolic label.
    pub label: String,
    pub value: Option<f64>,
}

/// One line of the diagnostic table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRow {
    pub kpi_key: String,
    pub display_name: String,
    pub values: Vec<YearValue>,
    pub cagr: Option<f64>,
}

impl KpiRow {
    pub fn value_for(&self, token: YearToken) -> Option<f64> {
        self.values
            .iter()
            .find(|v| v.token == token)
            .and_then(|v| v.value)
    }
}

pub fn kpi_table<S: AsRef<str>>(
    resolver: &KpiResolver<'_>,
    keys: &[S],
    years: &[YearToken],
) -> Vec<KpiRow> {
    keys.iter()
        .map(|key| {
            let key = key.as_ref();
            let values = years
                .iter()
                .map(|&token| YearValue {
                    token,
                    label: resolver.normalizer().label(token),
                    value: resolver.resolve(key, token),
                })
                .collect();

            KpiRow {
                kpi_key: key.to_string(),
                display_name: CanonicalKpiSet::display_name(key),
                values,
                cagr: cagr(resolver, key),
            }
        })
        .collect()
}
