use crate::error::{ProfileEngineError, Result};
use crate::reconciler::DEFAULT_MAX_DOCUMENTS;
use crate::registry::REPORT_KPIS;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineOptions {
    #[schemars(description = "Absolute year-over-year change, in percent, below which a KPI is reported as stable")]
    pub stability_threshold_pct: f64,

    #[schemars(description = "Number of documents expected per profile; more are merged but logged")]
    pub max_documents: usize,

    #[schemars(description = "Canonical KPI keys listed in the report table, in display order")]
    pub report_kpis: Vec<String>,

    #[schemars(description = "Log every KPI resolution step at trace level")]
    pub trace_resolution: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stability_threshold_pct: 1.0,
            max_documents: DEFAULT_MAX_DOCUMENTS,
            report_kpis: REPORT_KPIS.iter().map(|k| k.to_string()).collect(),
            trace_resolution: false,
        }
    }
}

impl EngineOptions {
    /// Parses and validates options; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.stability_threshold_pct.is_finite() || self.stability_threshold_pct < 0.0 {
            return Err(ProfileEngineError::InvalidOption {
                name: "stability_threshold_pct".to_string(),
                details: format!(
                    "must be a finite, non-negative percentage (got {})",
                    self.stability_threshold_pct
                ),
            });
        }

        if self.max_documents == 0 {
            return Err(ProfileEngineError::InvalidOption {
                name: "max_documents".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        if let Some(blank) = self.report_kpis.iter().find(|k| k.trim().is_empty()) {
            return Err(ProfileEngineError::InvalidOption {
                name: "report_kpis".to_string(),
                details: format!("contains a blank key ({:?})", blank),
            });
        }

        Ok(())
    }
}
