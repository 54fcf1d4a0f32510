//! VAT consistency check.
//!
//! Reconstructs the cash actually collected from customers over the year and compares the
//! VAT it implies (at the standard 20% rate, i.e. one sixth of a VAT-inclusive amount) with
//! the VAT the company declared.

use crate::schema::RawExtraction;
use crate::utils::deserialize_lenient_amount;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VAT-inclusive amount divisor for the 20% standard rate.
const VAT_INCLUSIVE_DIVISOR: f64 = 6.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TvaData {
    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    #[schemars(with = "Option<f64>", description = "Revenue excluding VAT for the year")]
    pub chiffre_affaires: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    #[schemars(with = "Option<f64>", description = "VAT invoiced to customers (T.V.A. facturée)")]
    pub tva_facturee: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    #[schemars(with = "Option<f64>", description = "VAT declared to the tax authority (T.V.A. pratique)")]
    pub tva_pratique: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    #[schemars(with = "Option<f64>", description = "Customer receivables at the end of the previous year")]
    pub clients_exercice_precedent: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_lenient_amount")]
    #[schemars(with = "Option<f64>", description = "Gross customer receivables at the end of this year")]
    pub clients_exercice_brut: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TvaAnalysis {
    pub chiffre_affaires: Option<f64>,
    pub tva_facturee: Option<f64>,
    pub tva_pratique: Option<f64>,
    pub clients_exercice_precedent: Option<f64>,
    pub clients_exercice_brut: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encaissement_theorique: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tva_theorique: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecart_tva: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecart_tva_pourcentage: Option<f64>,
}

impl TvaAnalysis {
    /// `encaissement = CA + VAT invoiced + opening receivables - closing receivables`,
    /// computed only when all four inputs are known.
    pub fn compute(data: &TvaData) -> Self {
        let mut analysis = Self {
            chiffre_affaires: data.chiffre_affaires,
            tva_facturee: data.tva_facturee,
            tva_pratique: data.tva_pratique,
            clients_exercice_precedent: data.clients_exercice_precedent,
            clients_exercice_brut: data.clients_exercice_brut,
            ..Default::default()
        };

        let (Some(ca), Some(facturee), Some(precedent), Some(brut)) = (
            data.chiffre_affaires,
            data.tva_facturee,
            data.clients_exercice_precedent,
            data.clients_exercice_brut,
        ) else {
            return analysis;
        };

        let encaissement = ca + facturee + precedent - brut;
        let theorique = encaissement / VAT_INCLUSIVE_DIVISOR;
        analysis.encaissement_theorique = Some(encaissement);
        analysis.tva_theorique = Some(theorique);

        if let Some(pratique) = data.tva_pratique {
            let ecart = theorique - pratique;
            analysis.ecart_tva = Some(ecart);
            analysis.ecart_tva_pourcentage = Some(if theorique != 0.0 {
                ecart / theorique * 100.0
            } else {
                0.0
            });
        }

        analysis
    }
}

/// One analysis per document that carries VAT figures, keyed `tva_analysis_{fiscal_year}`.
/// Documents without a fiscal year share the `tva_analysis_unknown` key; the later one wins.
pub fn analyse_documents(documents: &[RawExtraction]) -> BTreeMap<String, TvaAnalysis> {
    documents
        .iter()
        .filter_map(|doc| {
            let data = doc.tva_data.as_ref()?;
            let year = doc
                .fiscal_year
                .as_deref()
                .map(str::trim)
                .filter(|y| !y.is_empty())
                .unwrap_or("unknown");
            Some((format!("tva_analysis_{}", year), TvaAnalysis::compute(data)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TvaData {
        TvaData {
            chiffre_affaires: Some(1_000_000.0),
            tva_facturee: Some(200_000.0),
            tva_pratique: Some(190_000.0),
            clients_exercice_precedent: Some(150_000.0),
            clients_exercice_brut: Some(110_000.0),
        }
    }

    #[test]
    fn test_theoretical_vat() {
        let analysis = TvaAnalysis::compute(&sample());

        assert_eq!(analysis.encaissement_theorique, Some(1_240_000.0));
        let theorique = analysis.tva_theorique.unwrap();
        assert!((theorique - 206_666.666).abs() < 0.01);
        assert!((analysis.ecart_tva.unwrap() - 16_666.666).abs() < 0.01);
        assert!((analysis.ecart_tva_pourcentage.unwrap() - 8.0645).abs() < 0.001);
    }

    #[test]
    fn test_missing_input_skips_computation() {
        let mut data = sample();
        data.clients_exercice_brut = None;
        let analysis = TvaAnalysis::compute(&data);

        assert_eq!(analysis.chiffre_affaires, Some(1_000_000.0));
        assert_eq!(analysis.encaissement_theorique, None);
        assert_eq!(analysis.ecart_tva, None);
    }

    #[test]
    fn test_zero_theoretical_vat() {
        let data = TvaData {
            chiffre_affaires: Some(0.0),
            tva_facturee: Some(0.0),
            tva_pratique: Some(50.0),
            clients_exercice_precedent: Some(0.0),
            clients_exercice_brut: Some(0.0),
        };
        let analysis = TvaAnalysis::compute(&data);
        assert_eq!(analysis.ecart_tva, Some(-50.0));
        assert_eq!(analysis.ecart_tva_pourcentage, Some(0.0));
    }

    #[test]
    fn test_analyse_documents_keys_by_year() {
        let with_vat: RawExtraction = serde_json::from_value(json!({
            "fiscal_year": "2023",
            "tva_data": {
                "chiffre_affaires": "600",
                "tva_facturee": 120,
                "clients_exercice_precedent": 0,
                "clients_exercice_brut": 0,
                "tva_pratique": "n/a"
            }
        }))
        .unwrap();
        let without_vat = RawExtraction::default();

        let analyses = analyse_documents(&[with_vat, without_vat]);
        assert_eq!(analyses.len(), 1);

        let analysis = &analyses["tva_analysis_2023"];
        assert_eq!(analysis.tva_theorique, Some(120.0));
        assert_eq!(analysis.tva_pratique, None);
        assert_eq!(analysis.ecart_tva, None);
    }
}
