use crate::growth::growth_rate;
use crate::registry::*;
use crate::resolver::KpiResolver;
use crate::schema::{flat_key, ComputedRatios, FinancialSnapshot, RatioMetadata};
use crate::years::{available_years, YearToken};
use log::debug;

/// What a ratio yields when its denominator cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenominatorPolicy {
    /// Missing or non-positive denominator gives `0`.
    ZeroUnlessPositive,
    /// Missing or zero denominator leaves the ratio out.
    NullUnlessNonZero,
}

#[derive(Debug, Clone, Copy)]
pub struct RatioDefinition {
    pub key: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub scale: f64,
    pub policy: DenominatorPolicy,
}

impl RatioDefinition {
    /// The denominator guard runs first; a usable denominator with a missing numerator
    /// leaves the ratio out.
    pub fn apply(&self, numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
        let usable = match self.policy {
            DenominatorPolicy::ZeroUnlessPositive => denominator.filter(|d| *d > 0.0),
            DenominatorPolicy::NullUnlessNonZero => denominator.filter(|d| *d != 0.0),
        };

        match (usable, self.policy) {
            (Some(d), _) => numerator.map(|n| n / d * self.scale),
            (None, DenominatorPolicy::ZeroUnlessPositive) => Some(0.0),
            (None, DenominatorPolicy::NullUnlessNonZero) => None,
        }
    }
}

const fn percent(key: &'static str, numerator: &'static str, denominator: &'static str) -> RatioDefinition {
    RatioDefinition {
        key,
        numerator,
        denominator,
        scale: 100.0,
        policy: DenominatorPolicy::ZeroUnlessPositive,
    }
}

pub const RATIO_DEFINITIONS: &[RatioDefinition] = &[
    percent("marge_ebitda", EBITDA, CHIFFRE_D_AFFAIRES),
    percent("marge_exploitation", RESULTAT_EXPLOITATION, CHIFFRE_D_AFFAIRES),
    percent("marge_nette", RESULTAT_NET, CHIFFRE_D_AFFAIRES),
    percent("roe", RESULTAT_NET, CAPITAUX_PROPRES),
    percent("roce", RESULTAT_EXPLOITATION, CAPITAUX_PROPRES),
    percent("gearing", DETTE_NETTE, CAPITAUX_PROPRES),
    RatioDefinition {
        key: "ratio_liquidite",
        numerator: ACTIF_CIRCULANT,
        denominator: PASSIF_CIRCULANT,
        scale: 1.0,
        policy: DenominatorPolicy::NullUnlessNonZero,
    },
    RatioDefinition {
        key: "capacite_remboursement",
        numerator: DETTE_NETTE,
        denominator: EBITDA,
        scale: 1.0,
        policy: DenominatorPolicy::NullUnlessNonZero,
    },
];

pub const ROTATION_ACTIFS: &str = "rotation_actifs";
pub const VARIATION_CHIFFRE_AFFAIRES: &str = "variation_chiffre_affaires";

/// `variation_chiffre_affaires_n_vs_n1` and so on.
pub fn variation_key(token: YearToken, previous: YearToken) -> String {
    format!(
        "{}_{}_vs_{}",
        VARIATION_CHIFFRE_AFFAIRES,
        token.key(),
        previous.key()
    )
}

pub struct RatioEngine;

impl RatioEngine {
    pub fn compute(snapshot: &FinancialSnapshot) -> ComputedRatios {
        Self::compute_with(&KpiResolver::new(snapshot))
    }

    /// Computes every ratio for every available period.
    ///
    /// Flat values already on the snapshot are carried over and the engine's own keys are
    /// overwritten (or removed when they resolve to nothing), so running the engine on its
    /// own output yields the same output.
    pub fn compute_with(resolver: &KpiResolver<'_>) -> ComputedRatios {
        let snapshot = resolver.snapshot();
        let years = available_years(Some(&snapshot.ratios.metadata));
        let mut output = snapshot.ratios.clone();

        for &token in &years {
            let mut set = |key: String, value: Option<f64>| match value {
                Some(v) => output.insert(key, v),
                None => {
                    output.remove(&key);
                }
            };

            for kpi in CanonicalKpiSet::derived() {
                set(flat_key(kpi.key, token), resolver.resolve(kpi.key, token));
            }

            for ratio in RATIO_DEFINITIONS {
                let value = ratio.apply(
                    resolver.resolve(ratio.numerator, token),
                    resolver.resolve(ratio.denominator, token),
                );
                set(flat_key(ratio.key, token), value);
            }

            set(flat_key(ROTATION_ACTIFS, token), Self::asset_turnover(resolver, token));

            if let Some(previous) = token.previous().filter(|p| years.contains(p)) {
                set(
                    variation_key(token, previous),
                    growth_rate(
                        resolver.resolve(CHIFFRE_D_AFFAIRES, token),
                        resolver.resolve(CHIFFRE_D_AFFAIRES, previous),
                    ),
                );
            }
        }

        output.metadata = RatioMetadata {
            processed_years: years.iter().map(|t| resolver.normalizer().label(*t)).collect(),
            total_years: years.len(),
            multi_document: snapshot.ratios.metadata.multi_document.clone(),
            available_years: years,
        };

        debug!(
            "Computed {} flat values over {} period(s): {:?}",
            output.len(),
            output.metadata.total_years,
            output.metadata.processed_years
        );

        output
    }

    /// Revenue over the average of the period's and the prior period's total current
    /// assets, averaging only the values present.
    fn asset_turnover(resolver: &KpiResolver<'_>, token: YearToken) -> Option<f64> {
        let assets: Vec<f64> = std::iter::once(token)
            .chain(token.previous())
            .filter_map(|t| resolver.resolve(ACTIF_CIRCULANT_TOTAL, t))
            .collect();

        let average = if assets.is_empty() {
            None
        } else {
            Some(assets.iter().sum::<f64>() / assets.len() as f64)
        };

        RatioDefinition {
            key: ROTATION_ACTIFS,
            numerator: CHIFFRE_D_AFFAIRES,
            denominator: ACTIF_CIRCULANT_TOTAL,
            scale: 1.0,
            policy: DenominatorPolicy::ZeroUnlessPositive,
        }
        .apply(resolver.resolve(CHIFFRE_D_AFFAIRES, token), average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{KpiTable, MultiDocumentMetadata};
    use crate::years::FiscalYearSpec;
    use approx::assert_relative_eq;

    fn snapshot(entries: &[(&str, &str, f64)]) -> FinancialSnapshot {
        let mut kpis = KpiTable::new();
        for (label, year, value) in entries {
            kpis.insert(*label, *year, Some(*value));
        }
        FinancialSnapshot {
            kpis,
            ..Default::default()
        }
    }

    #[test]
    fn test_non_positive_equity_zeroes_equity_ratios() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 10000.0),
            ("Résultat d'exploitation", "N", 1000.0),
            ("Résultat Net", "N", 500.0),
            ("Capitaux propres", "N", 0.0),
        ]);
        let ratios = RatioEngine::compute(&snap);

        assert_eq!(ratios.get("roe_n"), Some(0.0));
        assert_eq!(ratios.get("roce_n"), Some(0.0));
        assert_eq!(ratios.get("gearing_n"), Some(0.0));
        assert_relative_eq!(ratios.get("marge_nette_n").unwrap(), 5.0);
        assert_relative_eq!(ratios.get("marge_exploitation_n").unwrap(), 10.0);
    }

    #[test]
    fn test_missing_revenue_zeroes_margins() {
        let snap = snapshot(&[("Résultat Net", "N", 500.0)]);
        let ratios = RatioEngine::compute(&snap);

        assert_eq!(ratios.get("marge_nette_n"), Some(0.0));
        assert_eq!(ratios.get("marge_ebitda_n"), Some(0.0));
        assert_eq!(ratios.get("rotation_actifs_n"), Some(0.0));
    }

    #[test]
    fn test_missing_numerator_is_omitted() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 1000.0),
            ("Capitaux propres", "N", 2000.0),
        ]);
        let ratios = RatioEngine::compute(&snap);

        assert_eq!(ratios.get("marge_nette_n"), None);
        assert_eq!(ratios.get("roe_n"), None);
        assert_eq!(ratios.get("gearing_n"), None);
        assert_eq!(ratios.get("ebitda_n"), None);
    }

    #[test]
    fn test_liquidity_needs_non_zero_liabilities() {
        let ratios = RatioEngine::compute(&snapshot(&[("Actif circulant", "N", 800.0)]));
        assert_eq!(ratios.get("ratio_liquidite_n"), None);

        let ratios = RatioEngine::compute(&snapshot(&[
            ("Actif circulant", "N", 800.0),
            ("Passif circulant", "N", 0.0),
        ]));
        assert_eq!(ratios.get("ratio_liquidite_n"), None);

        let ratios = RatioEngine::compute(&snapshot(&[
            ("Actif circulant", "N", 800.0),
            ("Passif circulant", "N", 400.0),
        ]));
        assert_relative_eq!(ratios.get("ratio_liquidite_n").unwrap(), 2.0);
        assert_relative_eq!(ratios.get("bfr_n").unwrap(), 400.0);
    }

    #[test]
    fn test_ebitda_margin_and_debt_capacity() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 5500.0),
            ("Résultat d'exploitation", "N", 500.0),
            ("Dotations d'exploitation", "N", 100.0),
            ("Reprises d'exploitation; transferts de charges", "N", 50.0),
            ("Dettes de financement", "N", 1400.0),
            ("Trésorerie-Actif", "N", 300.0),
            ("Capitaux propres", "N", 2200.0),
        ]);
        let ratios = RatioEngine::compute(&snap);

        assert_relative_eq!(ratios.get("ebitda_n").unwrap(), 550.0);
        assert_relative_eq!(ratios.get("marge_ebitda_n").unwrap(), 10.0);
        assert_relative_eq!(ratios.get("dette_nette_n").unwrap(), 1100.0);
        assert_relative_eq!(ratios.get("gearing_n").unwrap(), 50.0);
        assert_relative_eq!(ratios.get("capacite_remboursement_n").unwrap(), 2.0);
        assert_relative_eq!(ratios.get("tresorerie_nette_n").unwrap(), 300.0);
        assert_eq!(ratios.get("encours_credit_bail_n"), None);
    }

    #[test]
    fn test_asset_turnover_averages_present_values() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 1200.0),
            ("Chiffre d'affaires", "N-1", 700.0),
            ("Actif circulant total", "N", 500.0),
            ("Actif circulant total", "N-1", 700.0),
        ]);
        let ratios = RatioEngine::compute(&snap);

        assert_relative_eq!(ratios.get("rotation_actifs_n").unwrap(), 2.0);
        // Only N-1 is present for the prior period's average.
        assert_relative_eq!(ratios.get("rotation_actifs_n1").unwrap(), 1.0);
    }

    #[test]
    fn test_revenue_variation() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 1100.0),
            ("Chiffre d'affaires", "N-1", 1000.0),
        ]);
        let ratios = RatioEngine::compute(&snap);

        assert_relative_eq!(
            ratios.get("variation_chiffre_affaires_n_vs_n1").unwrap(),
            10.0,
            epsilon = 1e-9
        );
        assert_eq!(ratios.get("variation_chiffre_affaires_n1_vs_n2"), None);
    }

    #[test]
    fn test_metadata_and_multi_year() {
        let mut snap = snapshot(&[
            ("Chiffre d'affaires", "N", 1200.0),
            ("Chiffre d'affaires", "N-2", 1000.0),
        ]);
        snap.fiscal_year = Some(FiscalYearSpec::Range {
            start: 2021,
            end: 2023,
        });
        snap.ratios.metadata.available_years =
            vec![YearToken::new(2), YearToken::CURRENT, YearToken::PREVIOUS];
        snap.ratios.metadata.multi_document = Some(MultiDocumentMetadata {
            total_documents: 2,
            is_multi_document: true,
            ..Default::default()
        });

        let ratios = RatioEngine::compute(&snap);
        let meta = &ratios.metadata;

        assert_eq!(meta.total_years, 3);
        assert_eq!(meta.processed_years, vec!["2023", "2021", "N-2"]);
        assert_eq!(meta.multi_document.as_ref().unwrap().total_documents, 2);
        assert_eq!(ratios.get("rotation_actifs_n2"), Some(0.0));
        assert_eq!(ratios.get("marge_nette_n2"), None);
        assert_eq!(ratios.get("variation_chiffre_affaires_n1_vs_n2"), None);
    }

    #[test]
    fn test_oldest_representable_period() {
        let mut snap = snapshot(&[
            ("Chiffre d'affaires", "N", 1200.0),
            ("Actif circulant total", "N", 600.0),
        ]);
        let oldest = YearToken::new(u32::MAX);
        snap.ratios.metadata.available_years = vec![YearToken::CURRENT, oldest];

        let ratios = RatioEngine::compute(&snap);

        assert_eq!(ratios.metadata.total_years, 2);
        assert_eq!(ratios.get(&flat_key(ROTATION_ACTIFS, oldest)), Some(0.0));
        assert_relative_eq!(ratios.get("rotation_actifs_n").unwrap(), 2.0);
        assert!(ratios.iter().all(|(key, _)| !key.starts_with(VARIATION_CHIFFRE_AFFAIRES)));
    }

    #[test]
    fn test_recompute_is_stable() {
        let snap = snapshot(&[
            ("Chiffre d'affaires", "N", 5500.0),
            ("Chiffre d'affaires", "N-1", 5000.0),
            ("Résultat d'exploitation", "N", 500.0),
            ("Résultat Net", "N-1", 200.0),
            ("Capitaux propres", "N-1", 1000.0),
            ("Actif circulant", "N", 900.0),
        ]);
        let before = snap.clone();

        let first = RatioEngine::compute(&snap);
        let second = RatioEngine::compute(&snap.clone().with_ratios(first.clone()));

        assert_eq!(first, second);
        assert_eq!(snap, before);
    }

    #[test]
    fn test_policies() {
        let zero = percent("x", "a", "b");
        assert_eq!(zero.apply(Some(1.0), Some(-5.0)), Some(0.0));
        assert_eq!(zero.apply(None, None), Some(0.0));
        assert_eq!(zero.apply(None, Some(5.0)), None);

        let null = RatioDefinition {
            policy: DenominatorPolicy::NullUnlessNonZero,
            ..zero
        };
        assert_eq!(null.apply(Some(1.0), Some(0.0)), None);
        assert_eq!(null.apply(Some(-10.0), Some(-5.0)), Some(200.0));
    }
}
