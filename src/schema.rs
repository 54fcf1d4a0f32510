use crate::tva::TvaData;
use crate::utils::{amount_from_value, finite};
use crate::years::{FiscalYearSpec, YearToken};
use log::warn;
use schemars::JsonSchema;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Label-keyed KPI values as extracted from one or more documents:
/// `"Chiffre d'affaires" -> { "N": 12000.0, "N-1": 11000.0 }`.
///
/// Deserialization never fails on content: unparsable amounts become `None`, a bare scalar
/// where a year map was expected is read as the current period, and `_`-prefixed keys
/// (extraction metadata) are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct KpiTable(BTreeMap<String, BTreeMap<String, Option<f64>>>);

impl KpiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, year: impl Into<String>, value: Option<f64>) {
        self.0
            .entry(label.into())
            .or_default()
            .insert(year.into(), value.and_then(finite));
    }

    /// Writes a cell unless that would replace a known value with `None`.
    pub fn merge_cell(&mut self, label: &str, year: &str, value: Option<f64>) {
        let series = self.0.entry(label.to_string()).or_default();
        match value.and_then(finite) {
            Some(v) => {
                series.insert(year.to_string(), Some(v));
            }
            None => {
                series.entry(year.to_string()).or_insert(None);
            }
        }
    }

    pub fn get(&self, label: &str, year: &str) -> Option<f64> {
        self.0.get(label).and_then(|series| series.get(year).copied().flatten())
    }

    pub fn series(&self, label: &str) -> Option<&BTreeMap<String, Option<f64>>> {
        self.0.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Option<f64>>)> {
        self.0.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_json_map(raw: BTreeMap<String, Value>) -> Self {
        let mut table = Self::new();

        for (label, entry) in raw {
            if label.starts_with('_') {
                continue;
            }

            match entry {
                Value::Object(years) => {
                    let series = table.0.entry(label).or_default();
                    for (year, amount) in years {
                        series.insert(year, amount_from_value(&amount));
                    }
                }
                Value::Null => {
                    table.0.entry(label).or_default();
                }
                scalar @ (Value::Number(_) | Value::String(_)) => {
                    table.insert(label, YearToken::CURRENT.label(), amount_from_value(&scalar));
                }
                other => {
                    warn!("Ignoring KPI '{}' with unsupported value {}", label, other);
                }
            }
        }

        table
    }
}

impl<'de> Deserialize<'de> for KpiTable {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
        Ok(Self::from_json_map(raw.unwrap_or_default()))
    }
}

/// The payload returned by the extraction service for a single uploaded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawExtraction {
    #[serde(default)]
    #[schemars(description = "Legal name of the company as printed on the first page of the fiscal bundle, or null if unreadable")]
    pub company_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_fiscal_year")]
    #[schemars(
        with = "Option<String>",
        description = "Fiscal year closed by this document, e.g. '2023'. A range such as '2022-2023' is accepted."
    )]
    pub fiscal_year: Option<String>,

    #[serde(default, alias = "extracted_kpis")]
    #[schemars(
        description = "KPI values keyed by the French statement label, then by relative year ('N' for the closed year, 'N-1' for the comparative column). Use null for values that cannot be read."
    )]
    pub kpis: KpiTable,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "VAT figures from the VAT statement, if the bundle includes one")]
    pub tva_data: Option<TvaData>,
}

impl RawExtraction {
    /// Trimmed company name, `None` when missing or blank.
    pub fn company(&self) -> Option<&str> {
        self.company_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Parsed fiscal year. A malformed value is logged and treated as missing.
    pub fn fiscal_year_spec(&self) -> Option<FiscalYearSpec> {
        let raw = self.fiscal_year.as_deref()?;
        match raw.parse() {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("{}; ignoring fiscal year", e);
                None
            }
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RawExtraction)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

fn lenient_fiscal_year<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => {
            warn!("Ignoring fiscal year with unsupported value {}", other);
            None
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiDocumentMetadata {
    pub total_documents: usize,
    pub fiscal_years: Vec<i32>,
    /// Absolute fiscal year -> the relative period it occupies in the merged timeline.
    pub year_mapping: BTreeMap<i32, YearToken>,
    pub is_multi_document: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioMetadata {
    pub available_years: Vec<YearToken>,
    pub processed_years: Vec<String>,
    pub total_years: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_document: Option<MultiDocumentMetadata>,
}

const METADATA_KEY: &str = "_metadata";

/// Flat `"{key}_{token}" -> value` figures plus the `_metadata` block, serialized as a
/// single JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedRatios {
    values: BTreeMap<String, f64>,
    pub metadata: RatioMetadata,
}

impl ComputedRatios {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value; non-finite values are dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match finite(value) {
            Some(v) => {
                self.values.insert(key, v);
            }
            None => warn!("Dropping non-finite value for '{}'", key),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn remove(&mut self, key: &str) -> Option<f64> {
        self.values.remove(key)
    }

    /// Looks up `"{key}_{token}"`, e.g. `roe_n1`.
    pub fn get_for(&self, key: &str, token: YearToken) -> Option<f64> {
        self.get(&flat_key(key, token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn flat_key(key: &str, token: YearToken) -> String {
    format!("{}_{}", key, token.key())
}

impl Serialize for ComputedRatios {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(METADATA_KEY, &self.metadata)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ComputedRatios {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
        let mut ratios = ComputedRatios::new();

        for (key, value) in raw {
            if key == METADATA_KEY {
                ratios.metadata = serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!("Malformed ratio metadata ({}); using defaults", e);
                    RatioMetadata::default()
                });
            } else if let Some(amount) = amount_from_value(&value) {
                ratios.values.insert(key, amount);
            }
        }

        Ok(ratios)
    }
}

/// The immutable input every computation reads from: merged tables, any precomputed flat
/// values, and the fiscal year anchoring relative periods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<FiscalYearSpec>,
    #[serde(default)]
    pub kpis: KpiTable,
    #[serde(default)]
    pub ratios: ComputedRatios,
}

impl FinancialSnapshot {
    pub fn from_extraction(extraction: &RawExtraction) -> Self {
        Self {
            company_name: extraction.company().map(str::to_string),
            fiscal_year: extraction.fiscal_year_spec(),
            kpis: extraction.kpis.clone(),
            ratios: ComputedRatios::default(),
        }
    }

    pub fn with_ratios(mut self, ratios: ComputedRatios) -> Self {
        self.ratios = ratios;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A company's reconciled financial profile, as handed to the workflow that persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub company_name: Option<String>,
    pub fiscal_year: Option<FiscalYearSpec>,
    pub kpis: KpiTable,
    pub computed_ratios: ComputedRatios,
    pub status: ProfileStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_generation() {
        let schema_json = RawExtraction::schema_as_json().unwrap();
        assert!(schema_json.contains("company_name"));
        assert!(schema_json.contains("fiscal_year"));
        assert!(schema_json.contains("kpis"));
        println!("Generated schema:\n{}", schema_json);
    }

    #[test]
    fn test_lenient_extraction_payload() {
        let payload = json!({
            "company_name": "  Acme SA ",
            "fiscal_year": 2023,
            "extracted_kpis": {
                "Chiffre d'affaires": { "N": "12 000,50", "N-1": 11000 },
                "Résultat Net": { "N": "illisible", "N-1": null },
                "Capitaux propres": 5000,
                "_notes": "page 3 blurry",
                "Bogus": [1, 2]
            }
        });

        let doc: RawExtraction = serde_json::from_value(payload).unwrap();
        assert_eq!(doc.company(), Some("Acme SA"));
        assert_eq!(doc.fiscal_year.as_deref(), Some("2023"));
        assert_eq!(doc.fiscal_year_spec(), Some(FiscalYearSpec::Single(2023)));

        assert_eq!(doc.kpis.get("Chiffre d'affaires", "N"), Some(12000.5));
        assert_eq!(doc.kpis.get("Chiffre d'affaires", "N-1"), Some(11000.0));
        assert_eq!(doc.kpis.get("Résultat Net", "N"), None);
        assert!(doc.kpis.series("Résultat Net").unwrap().contains_key("N-1"));
        assert_eq!(doc.kpis.get("Capitaux propres", "N"), Some(5000.0));
        assert!(doc.kpis.series("_notes").is_none());
        assert!(doc.kpis.series("Bogus").is_none());
    }

    #[test]
    fn test_empty_and_null_payloads() {
        let doc: RawExtraction = serde_json::from_value(json!({})).unwrap();
        assert!(doc.kpis.is_empty());
        assert_eq!(doc.company(), None);

        let doc: RawExtraction = serde_json::from_value(json!({
            "company_name": "   ",
            "fiscal_year": "FY-23",
            "kpis": null
        }))
        .unwrap();
        assert_eq!(doc.company(), None);
        assert_eq!(doc.fiscal_year_spec(), None);
        assert!(doc.kpis.is_empty());
    }

    #[test]
    fn test_merge_cell_keeps_known_values() {
        let mut table = KpiTable::new();
        table.merge_cell("BFR", "N", Some(10.0));
        table.merge_cell("BFR", "N", None);
        assert_eq!(table.get("BFR", "N"), Some(10.0));

        table.merge_cell("BFR", "N", Some(12.0));
        assert_eq!(table.get("BFR", "N"), Some(12.0));

        table.merge_cell("BFR", "N-1", None);
        assert!(table.series("BFR").unwrap().contains_key("N-1"));
    }

    #[test]
    fn test_computed_ratios_flat_json_shape() {
        let mut ratios = ComputedRatios::new();
        ratios.insert("roe_n", 12.5);
        ratios.insert("gearing_n", f64::NAN);
        ratios.metadata.available_years = vec![YearToken::CURRENT, YearToken::PREVIOUS];
        ratios.metadata.total_years = 2;

        let value = serde_json::to_value(&ratios).unwrap();
        assert_eq!(value["roe_n"], json!(12.5));
        assert!(value.get("gearing_n").is_none());
        assert_eq!(value["_metadata"]["available_years"], json!(["N", "N-1"]));

        let back: ComputedRatios = serde_json::from_value(value).unwrap();
        assert_eq!(back, ratios);
    }

    #[test]
    fn test_computed_ratios_lenient_read() {
        let ratios: ComputedRatios = serde_json::from_value(json!({
            "ebitda_n": "550",
            "marge_nette_n": null,
            "label": "n/a",
            "_metadata": { "available_years": "not-a-list" }
        }))
        .unwrap();

        assert_eq!(ratios.get("ebitda_n"), Some(550.0));
        assert_eq!(ratios.get_for("ebitda", YearToken::CURRENT), Some(550.0));
        assert_eq!(ratios.get("marge_nette_n"), None);
        assert_eq!(ratios.len(), 1);
        assert_eq!(ratios.metadata, RatioMetadata::default());
    }
}
