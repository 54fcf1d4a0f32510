use crate::registry::CanonicalKpiSet;
use crate::schema::{flat_key, FinancialSnapshot};
use crate::years::{YearNormalizer, YearToken};
use log::trace;

/// Which branch produced (or failed to produce) a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionEvent<'a> {
    FlatHit {
        key: &'a str,
        token: YearToken,
        value: f64,
    },
    Derived {
        key: &'a str,
        token: YearToken,
        value: f64,
    },
    NestedHit {
        key: &'a str,
        token: YearToken,
        label: &'a str,
        year: &'a str,
        value: f64,
    },
    FuzzyHit {
        key: &'a str,
        token: YearToken,
        label: &'a str,
        value: f64,
    },
    Miss {
        key: &'a str,
        token: YearToken,
    },
}

/// Observability hook for resolution. Resolution itself stays side-effect free unless a
/// tracer with side effects is injected.
pub trait ResolutionTracer {
    fn record(&self, event: &ResolutionEvent<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl ResolutionTracer for NoopTracer {
    fn record(&self, _event: &ResolutionEvent<'_>) {}
}

/// Writes every event to the `log` facade at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl ResolutionTracer for LogTracer {
    fn record(&self, event: &ResolutionEvent<'_>) {
        trace!("KPI resolution: {:?}", event);
    }
}

static NOOP_TRACER: NoopTracer = NoopTracer;

/// Resolves canonical KPI values for a relative period out of a [`FinancialSnapshot`].
///
/// Lookup order:
/// 1. precomputed flat value `"{key}_{token}"`;
/// 2. the registry derivation (each term resolved through this same order, missing terms
///    counted as zero);
/// 3. the registry label in the extracted table, at the normalized year;
/// 4. the first table label containing the key with underscores read as spaces;
/// 5. `None`.
pub struct KpiResolver<'a> {
    snapshot: &'a FinancialSnapshot,
    normalizer: YearNormalizer,
    tracer: &'a dyn ResolutionTracer,
}

impl<'a> KpiResolver<'a> {
    pub fn new(snapshot: &'a FinancialSnapshot) -> Self {
        Self {
            snapshot,
            normalizer: YearNormalizer::for_snapshot(snapshot),
            tracer: &NOOP_TRACER,
        }
    }

    pub fn with_tracer(mut self, tracer: &'a dyn ResolutionTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_normalizer(mut self, normalizer: YearNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn snapshot(&self) -> &FinancialSnapshot {
        self.snapshot
    }

    pub fn normalizer(&self) -> &YearNormalizer {
        &self.normalizer
    }

    pub fn resolve(&self, key: &str, token: YearToken) -> Option<f64> {
        if let Some(value) = self.snapshot.ratios.get(&flat_key(key, token)) {
            self.tracer.record(&ResolutionEvent::FlatHit { key, token, value });
            return Some(value);
        }

        let canonical = CanonicalKpiSet::get(key);
        let label_first = canonical.map_or(false, |kpi| kpi.label_first);
        let label = canonical.and_then(|kpi| kpi.db_label);

        if label_first {
            if let Some(value) = label.and_then(|label| self.labelled(key, label, token)) {
                return Some(value);
            }
        }

        if let Some(derivation) = canonical.and_then(|kpi| kpi.derivation) {
            if let Some(value) = derivation.evaluate(|dep| self.resolve(dep, token)) {
                self.tracer.record(&ResolutionEvent::Derived { key, token, value });
                return Some(value);
            }
        }

        if !label_first {
            if let Some(value) = label.and_then(|label| self.labelled(key, label, token)) {
                return Some(value);
            }
        }

        if let Some((label, value)) = self.lookup_fuzzy(key, token) {
            self.tracer.record(&ResolutionEvent::FuzzyHit {
                key,
                token,
                label,
                value,
            });
            return Some(value);
        }

        self.tracer.record(&ResolutionEvent::Miss { key, token });
        None
    }

    /// Resolves `key` for each token, in the given order.
    pub fn resolve_series(&self, key: &str, tokens: &[YearToken]) -> Vec<(YearToken, Option<f64>)> {
        tokens
            .iter()
            .map(|&token| (token, self.resolve(key, token)))
            .collect()
    }

    fn labelled(&self, key: &str, label: &str, token: YearToken) -> Option<f64> {
        let (year, value) = self.lookup_label(label, token)?;
        self.tracer.record(&ResolutionEvent::NestedHit {
            key,
            token,
            label,
            year: &year,
            value,
        });
        Some(value)
    }

    fn lookup_label(&self, label: &str, token: YearToken) -> Option<(String, f64)> {
        let series = self.snapshot.kpis.series(label)?;
        self.normalizer
            .lookup_keys(token)
            .into_iter()
            .find_map(|year| series.get(&year).copied().flatten().map(|value| (year, value)))
    }

    fn lookup_fuzzy(&self, key: &str, token: YearToken) -> Option<(&'a str, f64)> {
        let needle = key.replace('_', " ").trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        let years = self.normalizer.lookup_keys(token);
        let snapshot: &'a FinancialSnapshot = self.snapshot;

        snapshot
            .kpis
            .iter()
            .filter(|(label, _)| label.to_lowercase().contains(&needle))
            .find_map(|(label, series)| {
                years
                    .iter()
                    .find_map(|year| series.get(year).copied().flatten())
                    .map(|value| (label.as_str(), value))
            })
    }
}
