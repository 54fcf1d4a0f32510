use crate::config::EngineOptions;
use crate::growth::{kpi_table, GrowthNarrative, KpiRow};
use crate::reconciler::MismatchReport;
use crate::resolver::KpiResolver;
use crate::schema::ComputedRatios;
use crate::tva::TvaAnalysis;
use crate::years::{available_years, FiscalYearSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the report renderer needs, with numbers left raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub company_name: Option<String>,
    pub fiscal_year: Option<FiscalYearSpec>,
    pub year_labels: Vec<String>,
    pub kpi_rows: Vec<KpiRow>,
    pub revenue_trend: GrowthNarrative,
    pub revenue_trend_summary: String,
    pub ratios: ComputedRatios,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<MismatchReport>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tva_analysis: BTreeMap<String, TvaAnalysis>,
}

impl FinancialReport {
    pub fn assemble(
        resolver: &KpiResolver<'_>,
        ratios: ComputedRatios,
        options: &EngineOptions,
        mismatch: Option<MismatchReport>,
        tva_analysis: BTreeMap<String, TvaAnalysis>,
    ) -> Self {
        let snapshot = resolver.snapshot();
        let years = available_years(Some(&ratios.metadata));
        let revenue_trend = GrowthNarrative::revenue(resolver, options.stability_threshold_pct);

        Self {
            company_name: snapshot.company_name.clone(),
            fiscal_year: snapshot.fiscal_year,
            year_labels: years.iter().map(|t| resolver.normalizer().label(*t)).collect(),
            kpi_rows: kpi_table(resolver, options.report_kpis.as_slice(), &years),
            revenue_trend_summary: revenue_trend.to_string(),
            revenue_trend,
            ratios,
            mismatch,
            tva_analysis,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One row per KPI: display name, key, one column per year label, then the growth rate.
    /// Missing values are empty cells.
    pub fn to_csv(&self) -> String {
        let mut output = String::new();

        let mut header = vec!["KPI".to_string(), "Key".to_string()];
        header.extend(self.year_labels.iter().cloned());
        header.push("CAGR (%)".to_string());
        push_record(&mut output, &header);

        for row in &self.kpi_rows {
            let mut record = vec![row.display_name.clone(), row.kpi_key.clone()];
            record.extend(row.values.iter().map(|v| format_cell(v.value)));
            record.push(format_cell(row.cagr));
            push_record(&mut output, &record);
        }

        output
    }
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn push_record(output: &mut String, fields: &[String]) {
    let line: Vec<String> = fields
        .iter()
        .map(|field| {
            if field.contains([',', '"', '\n']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect();
    output.push_str(&line.join(","));
    output.push('\n');
}
