//! # Fiscal Profile Engine
//!
//! A library for turning the KPI tables extracted (by OCR) from a company's fiscal bundles
//! into one reconciled multi-year financial profile, with derived ratios and year-over-year
//! growth figures ready for reporting.
//!
//! ## Core Concepts
//!
//! - **Extraction**: one document's `{company_name, fiscal_year, kpis}` payload, with KPI
//!   values keyed by French statement label and relative year (`N`, `N-1`)
//! - **Snapshot**: several extractions merged onto one timeline, read-only from then on
//! - **Resolution**: fetching a canonical KPI for a period, whether it was extracted,
//!   precomputed, or has to be derived from other KPIs
//! - **Ratios**: margins, returns and leverage per period, with explicit rules for missing
//!   or non-positive denominators
//! - **Company check**: documents naming different companies are flagged for confirmation
//!   rather than silently merged into one profile
//!
//! ## Example
//!
//! ```rust,ignore
//! use fiscal_profile_engine::*;
//!
//! let documents: Vec<RawExtraction> = serde_json::from_str(r#"[
//!     {
//!         "company_name": "Acme SA",
//!         "fiscal_year": "2023",
//!         "extracted_kpis": {
//!             "Chiffre d'affaires": { "N": 12000, "N-1": 11000 },
//!             "Résultat Net": { "N": 900, "N-1": 700 },
//!             "Capitaux propres": { "N": 4500, "N-1": 4000 }
//!         }
//!     }
//! ]"#)?;
//!
//! let computation = ProfileEngine::new(EngineOptions::default()).process(&documents);
//! println!("ROE: {:?}", computation.ratios.get("roe_n"));
//! println!("{}", computation.report.to_csv());
//! ```

pub mod config;
pub mod error;
pub mod growth;
pub mod ratios;
pub mod reconciler;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod tva;
pub mod utils;
pub mod verification;
pub mod years;

pub use config::EngineOptions;
pub use error::{ProfileEngineError, Result};
pub use growth::{cagr, growth_rate, kpi_table, GrowthNarrative, KpiRow, YearValue};
pub use ratios::{DenominatorPolicy, RatioDefinition, RatioEngine, RATIO_DEFINITIONS};
pub use reconciler::{
    company_names, compare_document_companies, compare_with_profile, ComparisonResult,
    DocumentReconciler, MismatchReport, NameHints, ProfileCreationDecision, Severity,
};
pub use registry::{CanonicalKpi, CanonicalKpiSet, Derivation, Sign, REPORT_KPIS};
pub use report::FinancialReport;
pub use resolver::{KpiResolver, LogTracer, NoopTracer, ResolutionEvent, ResolutionTracer};
pub use schema::*;
pub use tva::{analyse_documents, TvaAnalysis, TvaData};
pub use verification::{FailureReason, RoundState, VerificationRound};
pub use years::*;

use log::{debug, info};

/// Everything produced from one batch of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileComputation {
    pub snapshot: FinancialSnapshot,
    pub ratios: ComputedRatios,
    pub report: FinancialReport,
    /// Present only when the documents disagree on the company.
    pub mismatch: Option<MismatchReport>,
    pub decision: ProfileCreationDecision,
}

impl ProfileComputation {
    pub fn into_profile(self) -> Profile {
        Profile {
            company_name: self.snapshot.company_name,
            fiscal_year: self.snapshot.fiscal_year,
            kpis: self.snapshot.kpis,
            computed_ratios: self.ratios,
            status: ProfileStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileEngine {
    options: EngineOptions,
    reconciler: DocumentReconciler,
}

impl ProfileEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            reconciler: DocumentReconciler::new(options.max_documents),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn process(&self, documents: &[RawExtraction]) -> ProfileComputation {
        self.process_with_hints(documents, &NameHints::default())
    }

    /// Merges the documents, checks their company names, computes ratios and assembles the
    /// report. Never fails: unreadable input shows up as missing values.
    pub fn process_with_hints(
        &self,
        documents: &[RawExtraction],
        hints: &NameHints,
    ) -> ProfileComputation {
        info!("Processing {} extracted document(s)", documents.len());

        let snapshot = self.reconciler.merge(documents);

        let comparison = compare_document_companies(company_names(documents), hints);
        let decision = ProfileCreationDecision::from(&comparison);
        let mismatch = comparison.is_conflict().then_some(comparison);

        let tracer: &dyn ResolutionTracer = if self.options.trace_resolution {
            &LogTracer
        } else {
            &NoopTracer
        };
        let resolver = KpiResolver::new(&snapshot).with_tracer(tracer);

        let ratios = RatioEngine::compute_with(&resolver);
        let report = FinancialReport::assemble(
            &resolver,
            ratios.clone(),
            &self.options,
            mismatch.clone(),
            analyse_documents(documents),
        );

        debug!(
            "Profile for {}: {} KPI label(s), {} computed value(s), company check: {}",
            snapshot.company_name.as_deref().unwrap_or("<unknown company>"),
            snapshot.kpis.len(),
            ratios.len(),
            decision.comparison_result.reason
        );

        ProfileComputation {
            snapshot,
            ratios,
            report,
            mismatch,
            decision,
        }
    }

    pub fn build_profile(&self, documents: &[RawExtraction]) -> Profile {
        self.process(documents).into_profile()
    }

    /// Company check for documents added to an existing profile.
    pub fn decide_against_profile(
        &self,
        profile: &Profile,
        documents: &[RawExtraction],
        hints: &NameHints,
    ) -> ProfileCreationDecision {
        let names = company_names(documents);
        let report = match profile.company_name.as_deref() {
            Some(existing) => compare_with_profile(existing, names, hints),
            None => compare_document_companies(names, hints),
        };
        ProfileCreationDecision::from(&report)
    }
}

pub fn process_documents(documents: &[RawExtraction]) -> ProfileComputation {
    ProfileEngine::default().process(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn documents() -> Vec<RawExtraction> {
        serde_json::from_value(json!([
            {
                "company_name": "Acme SA",
                "fiscal_year": "2023",
                "extracted_kpis": {
                    "Chiffre d'affaires": { "N": 12000, "N-1": 11000 },
                    "Résultat d'exploitation": { "N": 1500, "N-1": 1200 },
                    "Dotations d'exploitation": { "N": 300, "N-1": 250 },
                    "Résultat Net": { "N": 900, "N-1": 700 },
                    "Capitaux propres": { "N": 4500, "N-1": 4000 }
                },
                "tva_data": {
                    "chiffre_affaires": 12000,
                    "tva_facturee": 2400,
                    "tva_pratique": 2300,
                    "clients_exercice_precedent": 1000,
                    "clients_exercice_brut": 1000
                }
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_end_to_end_processing() {
        let computation = process_documents(&documents());

        assert!(computation.mismatch.is_none());
        assert!(!computation.decision.requires_confirmation);
        assert_eq!(computation.snapshot.company_name.as_deref(), Some("Acme SA"));

        let ratios = &computation.ratios;
        assert!((ratios.get("roe_n").unwrap() - 20.0).abs() < 1e-9);
        assert!((ratios.get("marge_nette_n").unwrap() - 7.5).abs() < 1e-9);
        assert_eq!(ratios.get("ebitda_n"), Some(1800.0));
        assert_eq!(ratios.metadata.processed_years, vec!["2023", "2022"]);

        let report = &computation.report;
        assert_eq!(report.kpi_rows[0].kpi_key, "chiffre_d_affaires");
        assert!(matches!(report.revenue_trend, GrowthNarrative::Growth { .. }));
        assert_eq!(
            report.tva_analysis["tva_analysis_2023"].tva_theorique,
            Some(2400.0)
        );
    }

    #[test]
    fn test_mismatched_companies_are_flagged() {
        let mut docs = documents();
        let mut other = docs[0].clone();
        other.company_name = Some("Beta SARL".to_string());
        docs.push(other);

        let computation = process_documents(&docs);
        let mismatch = computation.mismatch.expect("mismatch expected");
        assert_eq!(mismatch.severity, Some(Severity::Red));
        assert!(computation.decision.requires_confirmation);
        assert!(computation.report.mismatch.is_some());
    }

    #[test]
    fn test_build_profile() {
        let profile = ProfileEngine::default().build_profile(&documents());
        assert_eq!(profile.status, ProfileStatus::Completed);
        assert_eq!(profile.fiscal_year, Some(FiscalYearSpec::Single(2023)));
        assert!(profile.computed_ratios.get("roe_n").is_some());
    }

    #[test]
    fn test_decide_against_profile() {
        let engine = ProfileEngine::default();
        let profile = engine.build_profile(&documents());

        let mut other = documents();
        other[0].company_name = Some("Gamma".to_string());

        let same = engine.decide_against_profile(&profile, &documents(), &NameHints::default());
        assert!(!same.requires_confirmation);

        let different = engine.decide_against_profile(&profile, &other, &NameHints::default());
        assert!(different.requires_confirmation);
        assert!(!different.comparison_result.is_match);
    }

    #[test]
    fn test_trace_resolution_does_not_change_results() {
        let traced = ProfileEngine::new(EngineOptions {
            trace_resolution: true,
            ..Default::default()
        })
        .process(&documents());

        assert_eq!(traced, process_documents(&documents()));
    }
}
