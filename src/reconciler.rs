//! Merging several extracted documents into one snapshot, and checking that they all
//! describe the same company.

use crate::schema::{FinancialSnapshot, KpiTable, MultiDocumentMetadata, RawExtraction};
use crate::years::{FiscalYearSpec, YearToken};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_DOCUMENTS: usize = 3;

#[derive(Debug, Clone)]
pub struct DocumentReconciler {
    max_documents: usize,
}

impl Default for DocumentReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENTS)
    }
}

impl DocumentReconciler {
    pub fn new(max_documents: usize) -> Self {
        Self { max_documents }
    }

    /// Merges documents in upload order into a single snapshot.
    ///
    /// Year columns are re-based onto the most recent fiscal year among the documents, so a
    /// 2022 bundle's `N` lands on `N-1` next to a 2023 bundle. For each cell a later document
    /// overrides an earlier one only when it carries a value.
    pub fn merge(&self, documents: &[RawExtraction]) -> FinancialSnapshot {
        if documents.len() > self.max_documents {
            warn!(
                "Merging {} documents, more than the expected maximum of {}",
                documents.len(),
                self.max_documents
            );
        }

        let specs: Vec<Option<FiscalYearSpec>> =
            documents.iter().map(RawExtraction::fiscal_year_spec).collect();
        let anchor = specs.iter().flatten().map(FiscalYearSpec::latest).max();

        let mut kpis = KpiTable::new();
        let mut available = BTreeSet::new();
        let mut year_mapping = BTreeMap::new();

        for (doc, spec) in documents.iter().zip(&specs) {
            let doc_year = spec.as_ref().map(FiscalYearSpec::latest);
            let shift = match (anchor, doc_year) {
                (Some(anchor), Some(year)) => (anchor - year) as u32,
                _ => 0,
            };

            available.insert(YearToken::new(shift));
            available.insert(YearToken::new(shift + 1));

            if let Some(year) = doc_year {
                year_mapping.entry(year).or_insert(YearToken::new(shift));
                year_mapping.entry(year - 1).or_insert(YearToken::new(shift + 1));
            }

            for (label, series) in doc.kpis.iter() {
                for (year_key, value) in series {
                    match rebase_year_key(year_key, shift, anchor) {
                        Some(key) => kpis.merge_cell(label, &key, *value),
                        None => debug!("Dropping '{}' for year key '{}' out of range", label, year_key),
                    }
                }
            }
        }

        let mut snapshot = FinancialSnapshot {
            company_name: documents
                .iter()
                .find_map(RawExtraction::company)
                .map(str::to_string),
            fiscal_year: FiscalYearSpec::from_years(
                specs
                    .iter()
                    .flatten()
                    .flat_map(|s| [*s.years().start(), *s.years().end()]),
            ),
            kpis,
            ..Default::default()
        };

        if documents.len() > 1 {
            let mut fiscal_years: Vec<i32> =
                specs.iter().flatten().map(FiscalYearSpec::latest).collect();
            fiscal_years.sort_unstable_by(|a, b| b.cmp(a));
            fiscal_years.dedup();

            snapshot.ratios.metadata.available_years = available.into_iter().collect();
            snapshot.ratios.metadata.multi_document = Some(MultiDocumentMetadata {
                total_documents: documents.len(),
                fiscal_years,
                year_mapping,
                is_multi_document: true,
            });
        }

        debug!(
            "Merged {} document(s) into {} KPI label(s), fiscal year {}",
            documents.len(),
            snapshot.kpis.len(),
            snapshot
                .fiscal_year
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        snapshot
    }
}

/// Relative keys move back by `shift` periods. Absolute years at or before the anchor
/// become relative keys; anything else is kept verbatim. `None` when the rebased period
/// lies beyond [`YearToken::MAX_OFFSET`].
fn rebase_year_key(key: &str, shift: u32, anchor: Option<i32>) -> Option<String> {
    let offset = match (key.parse::<YearToken>(), key.trim().parse::<i32>(), anchor) {
        (Ok(token), _, _) => token.offset().checked_add(shift),
        (_, Ok(year), Some(anchor)) if year <= anchor => anchor
            .checked_sub(year)
            .and_then(|distance| u32::try_from(distance).ok()),
        _ => return Some(key.to_string()),
    };

    offset
        .filter(|offset| *offset <= YearToken::MAX_OFFSET)
        .map(|offset| YearToken::new(offset).label())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Yellow,
    Orange,
    Red,
}

/// Similarity signals computed by the caller. The engine itself only compares names exactly
/// (ignoring case and surrounding whitespace).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameHints {
    pub partial_matches: Vec<String>,
    pub similar_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchReport {
    /// Distinct company names, case-folded.
    pub document_companies: BTreeSet<String>,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub severity: Option<Severity>,
    pub requires_confirmation: bool,
    pub reason: String,
    pub recommendation: String,
}

impl MismatchReport {
    pub fn is_conflict(&self) -> bool {
        !self.is_match
    }
}

pub fn company_names(documents: &[RawExtraction]) -> Vec<&str> {
    documents.iter().filter_map(RawExtraction::company).collect()
}

pub fn compare_document_companies<I, S>(names: I, hints: &NameHints) -> MismatchReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut folded = BTreeSet::new();
    let mut spellings: Vec<String> = Vec::new();

    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        if folded.insert(name.to_lowercase()) {
            spellings.push(name.to_string());
        }
    }

    if folded.len() <= 1 {
        let reason = if folded.is_empty() {
            "No company name could be read from the documents".to_string()
        } else {
            "All documents name the same company".to_string()
        };
        return MismatchReport {
            document_companies: folded,
            is_match: true,
            severity: None,
            requires_confirmation: false,
            reason,
            recommendation: String::new(),
        };
    }

    let severity = if !hints.partial_matches.is_empty() {
        Severity::Yellow
    } else if !hints.similar_names.is_empty() {
        Severity::Orange
    } else {
        Severity::Red
    };

    warn!(
        "Documents name {} different companies ({:?} severity)",
        folded.len(),
        severity
    );

    MismatchReport {
        reason: format!("Documents name {} different companies", folded.len()),
        recommendation: format!(
            "Confirm which company these documents belong to: {}",
            spellings.join(", ")
        ),
        document_companies: folded,
        is_match: false,
        severity: Some(severity),
        requires_confirmation: true,
    }
}

/// Compares the documents' names against an existing profile's company.
pub fn compare_with_profile<I, S>(profile_name: &str, names: I, hints: &NameHints) -> MismatchReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let all: Vec<String> = std::iter::once(profile_name.to_string())
        .chain(names.into_iter().map(|n| n.as_ref().to_string()))
        .collect();
    compare_document_companies(all, hints)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    pub reason: String,
    pub recommendation: String,
    pub document_companies: Vec<String>,
}

/// Whether the workflow must ask the user before creating a profile from these documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileCreationDecision {
    pub requires_confirmation: bool,
    pub comparison_result: ComparisonResult,
}

impl From<&MismatchReport> for ProfileCreationDecision {
    fn from(report: &MismatchReport) -> Self {
        Self {
            requires_confirmation: report.requires_confirmation,
            comparison_result: ComparisonResult {
                is_match: report.is_match,
                reason: report.reason.clone(),
                recommendation: report.recommendation.clone(),
                document_companies: report.document_companies.iter().cloned().collect(),
            },
        }
    }
}
