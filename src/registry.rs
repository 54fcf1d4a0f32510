//! The canonical KPI registry.
//!
//! Every KPI the engine knows is declared once here: its key (used by flat
//! `"{key}_{token}"` values), the label the extraction service files it under, and, for
//! aggregates, how to rebuild it from other KPIs when it was not extracted directly.

use serde::Serialize;

pub const CHIFFRE_D_AFFAIRES: &str = "chiffre_d_affaires";
pub const RESULTAT_EXPLOITATION: &str = "resultat_exploitation";
pub const RESULTAT_NET: &str = "resultat_net";
pub const DOTATIONS_EXPLOITATION: &str = "dotations_exploitation";
pub const REPRISES_EXPLOITATION: &str = "reprises_exploitation";
pub const REDEVANCES_CREDIT_BAIL: &str = "redevances_credit_bail";
pub const TRESORERIE_ACTIF: &str = "tresorerie_actif";
pub const TITRES_VALEURS_PLACEMENT: &str = "titres_valeurs_placement";
pub const DETTES_FINANCEMENT: &str = "dettes_financement";
pub const TRESORERIE_PASSIF: &str = "tresorerie_passif";
pub const COMPTES_ASSOCIES_ACTIF: &str = "comptes_associes_actif";
pub const COMPTES_ASSOCIES_PASSIF: &str = "comptes_associes_passif";
pub const REDEVANCES_PLUS_UN_AN: &str = "redevances_plus_un_an";
pub const REDEVANCES_MOINS_UN_AN: &str = "redevances_moins_un_an";
pub const PRIX_ACHAT_RESIDUEL: &str = "prix_achat_residuel";
pub const CAPITAUX_PROPRES: &str = "capitaux_propres";
pub const ACTIF_CIRCULANT: &str = "actif_circulant";
pub const PASSIF_CIRCULANT: &str = "passif_circulant";
pub const ACTIF_CIRCULANT_TOTAL: &str = "actif_circulant_total";
pub const EBITDA: &str = "ebitda";
pub const BFR: &str = "bfr";
pub const ENCOURS_CREDIT_BAIL: &str = "encours_credit_bail";
pub const DETTE_NETTE: &str = "dette_nette";
pub const TRESORERIE_NETTE: &str = "tresorerie_nette";

/// KPIs shown in the diagnostic table of a report, in display order.
pub const REPORT_KPIS: &[&str] = &[
    CHIFFRE_D_AFFAIRES,
    EBITDA,
    RESULTAT_NET,
    TRESORERIE_NETTE,
    CAPITAUX_PROPRES,
    DETTE_NETTE,
    BFR,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sign {
    Plus,
    Minus,
}

/// A signed sum of other registry KPIs for the same period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Derivation {
    pub terms: &'static [(Sign, &'static str)],
}

impl Derivation {
    /// Sums the terms, counting unresolved ones as zero. Returns `None` only when no term
    /// resolved at all.
    pub fn evaluate<F>(&self, mut resolve: F) -> Option<f64>
    where
        F: FnMut(&str) -> Option<f64>,
    {
        let mut total = 0.0;
        let mut any = false;

        for (sign, key) in self.terms {
            if let Some(value) = resolve(key) {
                any = true;
                match sign {
                    Sign::Plus => total += value,
                    Sign::Minus => total -= value,
                }
            }
        }

        any.then_some(total)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.terms.iter().map(|(_, key)| *key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanonicalKpi {
    pub key: &'static str,
    pub display_name: &'static str,
    /// Label the extraction service uses for this KPI, if it extracts it at all.
    pub db_label: Option<&'static str>,
    pub derivation: Option<Derivation>,
    /// An extracted value under `db_label` wins over the derivation.
    pub label_first: bool,
}

const fn raw(key: &'static str, display_name: &'static str, label: &'static str) -> CanonicalKpi {
    CanonicalKpi {
        key,
        display_name,
        db_label: Some(label),
        derivation: None,
        label_first: false,
    }
}

const EBITDA_TERMS: &[(Sign, &str)] = &[
    (Sign::Plus, RESULTAT_EXPLOITATION),
    (Sign::Plus, DOTATIONS_EXPLOITATION),
    (Sign::Minus, REPRISES_EXPLOITATION),
];

const BFR_TERMS: &[(Sign, &str)] = &[(Sign::Plus, ACTIF_CIRCULANT), (Sign::Minus, PASSIF_CIRCULANT)];

const ENCOURS_CREDIT_BAIL_TERMS: &[(Sign, &str)] = &[
    (Sign::Plus, REDEVANCES_MOINS_UN_AN),
    (Sign::Plus, REDEVANCES_PLUS_UN_AN),
    (Sign::Plus, PRIX_ACHAT_RESIDUEL),
];

const DETTE_NETTE_TERMS: &[(Sign, &str)] = &[
    (Sign::Plus, DETTES_FINANCEMENT),
    (Sign::Plus, TRESORERIE_PASSIF),
    (Sign::Plus, COMPTES_ASSOCIES_PASSIF),
    (Sign::Plus, ENCOURS_CREDIT_BAIL),
    (Sign::Minus, TRESORERIE_ACTIF),
    (Sign::Minus, TITRES_VALEURS_PLACEMENT),
    (Sign::Minus, COMPTES_ASSOCIES_ACTIF),
];

const TRESORERIE_NETTE_TERMS: &[(Sign, &str)] =
    &[(Sign::Plus, TRESORERIE_ACTIF), (Sign::Minus, TRESORERIE_PASSIF)];

// Labels are the extraction service's, typos included ("Redevanes").
static CANONICAL_KPIS: &[CanonicalKpi] = &[
    raw(CHIFFRE_D_AFFAIRES, "Chiffre d'Affaires", "Chiffre d'affaires"),
    raw(RESULTAT_EXPLOITATION, "Résultat d'Exploitation", "Résultat d'exploitation"),
    raw(RESULTAT_NET, "Résultat Net", "Résultat Net"),
    raw(DOTATIONS_EXPLOITATION, "Dotations d'Exploitation", "Dotations d'exploitation"),
    raw(
        REPRISES_EXPLOITATION,
        "Reprises d'Exploitation",
        "Reprises d'exploitation; transferts de charges",
    ),
    raw(REDEVANCES_CREDIT_BAIL, "Redevances de Crédit-Bail", "Redevances de crédit-bail"),
    raw(TRESORERIE_ACTIF, "Trésorerie Actif", "Trésorerie-Actif"),
    raw(TITRES_VALEURS_PLACEMENT, "Titres et Valeurs de Placement", "Titres Valeurs de placement"),
    raw(DETTES_FINANCEMENT, "Dettes de Financement", "Dettes de financement"),
    raw(TRESORERIE_PASSIF, "Trésorerie Passif", "Trésorerie-passif"),
    raw(COMPTES_ASSOCIES_ACTIF, "Comptes d'Associés (Actif)", "Compte d'associés (Actif)"),
    raw(COMPTES_ASSOCIES_PASSIF, "Comptes d'Associés (Passif)", "Compte d'associés (Passif)"),
    raw(
        REDEVANCES_PLUS_UN_AN,
        "Redevances Restant à Payer (+1 an)",
        "Redevanes restant à payer (a plus d'un an)",
    ),
    raw(
        REDEVANCES_MOINS_UN_AN,
        "Redevances Restant à Payer (-1 an)",
        "Redevanes restant à payer (a moins d'un an)",
    ),
    raw(PRIX_ACHAT_RESIDUEL, "Prix d'Achat Résiduel", "Prix d'achat résiduel en fin du contrat"),
    raw(CAPITAUX_PROPRES, "Capitaux Propres", "Capitaux propres"),
    raw(ACTIF_CIRCULANT, "Actif Circulant", "Actif circulant"),
    raw(PASSIF_CIRCULANT, "Passif Circulant", "Passif circulant"),
    raw(ACTIF_CIRCULANT_TOTAL, "Actif Circulant Total", "Actif circulant total"),
    CanonicalKpi {
        key: EBITDA,
        display_name: "EBITDA",
        db_label: Some("EBITDA"),
        derivation: Some(Derivation { terms: EBITDA_TERMS }),
        label_first: false,
    },
    CanonicalKpi {
        key: BFR,
        display_name: "BFR",
        db_label: Some("BFR"),
        derivation: Some(Derivation { terms: BFR_TERMS }),
        label_first: false,
    },
    CanonicalKpi {
        key: ENCOURS_CREDIT_BAIL,
        display_name: "Encours de Crédit-Bail",
        db_label: None,
        derivation: Some(Derivation {
            terms: ENCOURS_CREDIT_BAIL_TERMS,
        }),
        label_first: false,
    },
    CanonicalKpi {
        key: DETTE_NETTE,
        display_name: "Dette Nette",
        db_label: Some("Dette nette"),
        derivation: Some(Derivation {
            terms: DETTE_NETTE_TERMS,
        }),
        label_first: false,
    },
    CanonicalKpi {
        key: TRESORERIE_NETTE,
        display_name: "Trésorerie Nette",
        db_label: Some("Trésorerie nette"),
        derivation: Some(Derivation {
            terms: TRESORERIE_NETTE_TERMS,
        }),
        label_first: true,
    },
];

pub struct CanonicalKpiSet;

impl CanonicalKpiSet {
    pub fn all() -> &'static [CanonicalKpi] {
        CANONICAL_KPIS
    }

    pub fn get(key: &str) -> Option<&'static CanonicalKpi> {
        CANONICAL_KPIS.iter().find(|kpi| kpi.key == key)
    }

    pub fn by_label(label: &str) -> Option<&'static CanonicalKpi> {
        CANONICAL_KPIS.iter().find(|kpi| kpi.db_label == Some(label))
    }

    pub fn derived() -> impl Iterator<Item = &'static CanonicalKpi> {
        CANONICAL_KPIS.iter().filter(|kpi| kpi.derivation.is_some())
    }

    /// Display name for a key, falling back to a title-cased key for unknown KPIs.
    pub fn display_name(key: &str) -> String {
        match Self::get(key) {
            Some(kpi) => kpi.display_name.to_string(),
            None => key
                .split('_')
                .filter(|word| !word.is_empty())
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_keys_and_labels_are_unique() {
        let mut keys = HashSet::new();
        let mut labels = HashSet::new();
        for kpi in CanonicalKpiSet::all() {
            assert!(keys.insert(kpi.key), "duplicate key {}", kpi.key);
            if let Some(label) = kpi.db_label {
                assert!(labels.insert(label), "duplicate label {}", label);
            }
        }
    }

    #[test]
    fn test_derivations_reference_known_keys_without_cycles() {
        fn visit<'a>(key: &'a str, state: &mut HashMap<&'a str, bool>) {
            match state.get(key) {
                Some(true) => return,
                Some(false) => panic!("derivation cycle through {}", key),
                None => {}
            }
            state.insert(key, false);
            let kpi = CanonicalKpiSet::get(key).unwrap_or_else(|| panic!("unknown key {}", key));
            if let Some(derivation) = kpi.derivation {
                for dep in derivation.dependencies() {
                    visit(dep, state);
                }
            }
            state.insert(key, true);
        }

        let mut state = HashMap::new();
        for kpi in CanonicalKpiSet::derived() {
            visit(kpi.key, &mut state);
        }
    }

    #[test]
    fn test_report_kpis_are_registered() {
        for key in REPORT_KPIS {
            assert!(CanonicalKpiSet::get(key).is_some(), "{} not registered", key);
        }
    }

    #[test]
    fn test_ebitda_derivation() {
        let derivation = CanonicalKpiSet::get(EBITDA).unwrap().derivation.unwrap();
        let values: HashMap<&str, f64> = [
            (RESULTAT_EXPLOITATION, 500.0),
            (DOTATIONS_EXPLOITATION, 100.0),
            (REPRISES_EXPLOITATION, 50.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(derivation.evaluate(|k| values.get(k).copied()), Some(550.0));
    }

    #[test]
    fn test_derivation_missing_terms() {
        let derivation = CanonicalKpiSet::get(BFR).unwrap().derivation.unwrap();
        assert_eq!(derivation.evaluate(|_| None), None);
        assert_eq!(
            derivation.evaluate(|k| (k == PASSIF_CIRCULANT).then_some(300.0)),
            Some(-300.0)
        );
    }

    #[test]
    fn test_lookup_helpers() {
        assert_eq!(
            CanonicalKpiSet::by_label("Chiffre d'affaires").map(|k| k.key),
            Some(CHIFFRE_D_AFFAIRES)
        );
        assert_eq!(CanonicalKpiSet::display_name(DETTE_NETTE), "Dette Nette");
        assert_eq!(CanonicalKpiSet::display_name("marge_brute"), "Marge Brute");
    }
}
