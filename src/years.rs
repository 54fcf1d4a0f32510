//! Relative year tokens and their translation into absolute fiscal years.
//!
//! Extracted tables speak in relative periods (`N`, `N-1`, ...) while reports speak in
//! calendar years. A [`FiscalYearSpec`] anchors the two: a single year `"2023"` pins every
//! token (`N-k` is `2023 - k`), a range `"2022-2023"` only pins `N` and `N-1`.

use crate::error::{ProfileEngineError, Result};
use crate::schema::{FinancialSnapshot, RatioMetadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A relative period, stored as its distance from the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearToken(u32);

impl YearToken {
    pub const CURRENT: YearToken = YearToken(0);
    pub const PREVIOUS: YearToken = YearToken(1);
    /// Largest offset a parsed token may carry, so it can always be subtracted from a year.
    pub const MAX_OFFSET: u32 = i32::MAX as u32;

    pub fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> u32 {
        self.0
    }

    /// `None` once the offset would exceed [`YearToken::MAX_OFFSET`].
    pub fn previous(self) -> Option<Self> {
        self.0
            .checked_add(1)
            .filter(|offset| *offset <= Self::MAX_OFFSET)
            .map(Self)
    }

    /// Suffix used by flat keys: `n`, `n1`, `n2`.
    pub fn key(self) -> String {
        match self.0 {
            0 => "n".to_string(),
            k => format!("n{}", k),
        }
    }

    /// Label used by extracted tables: `N`, `N-1`, `N-2`.
    pub fn label(self) -> String {
        match self.0 {
            0 => "N".to_string(),
            k => format!("N-{}", k),
        }
    }

    /// Label variant some extractions emit: `N`, `N1`, `N2`.
    pub fn compact_label(self) -> String {
        match self.0 {
            0 => "N".to_string(),
            k => format!("N{}", k),
        }
    }
}

impl fmt::Display for YearToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for YearToken {
    type Err = ProfileEngineError;

    /// Accepts `n`, `n1`, `n-1`, `N`, `N1`, `N-1` and so on.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let malformed = || ProfileEngineError::MalformedInput(format!("Unrecognized year token '{}'", s));

        let rest = lowered.strip_prefix('n').ok_or_else(malformed)?;
        if rest.is_empty() {
            return Ok(Self::CURRENT);
        }

        let digits = rest.strip_prefix('-').unwrap_or(rest);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }

        match digits.parse::<u32>() {
            Ok(offset) if offset <= Self::MAX_OFFSET => Ok(Self(offset)),
            _ => Err(malformed()),
        }
    }
}

impl TryFrom<String> for YearToken {
    type Error = ProfileEngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<YearToken> for String {
    fn from(token: YearToken) -> Self {
        token.label()
    }
}

/// The fiscal year(s) a profile or document covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FiscalYearSpec {
    Single(i32),
    Range { start: i32, end: i32 },
}

impl FiscalYearSpec {
    /// Builds the tightest spec for a set of observed years: one year gives `Single`,
    /// several give `Range { min, max }`.
    pub fn from_years<I: IntoIterator<Item = i32>>(years: I) -> Option<Self> {
        let mut iter = years.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y)));

        if min == max {
            Some(Self::Single(min))
        } else {
            Some(Self::Range {
                start: min,
                end: max,
            })
        }
    }

    pub fn latest(&self) -> i32 {
        match *self {
            Self::Single(year) => year,
            Self::Range { end, .. } => end,
        }
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        match *self {
            Self::Single(year) => year..=year,
            Self::Range { start, end } => start..=end,
        }
    }

    /// True when every year of `target` lies within this spec.
    pub fn covers(&self, target: &FiscalYearSpec) -> bool {
        let own = self.years();
        let wanted = target.years();
        own.contains(wanted.start()) && own.contains(wanted.end())
    }
}

impl fmt::Display for FiscalYearSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(year) => write!(f, "{}", year),
            Self::Range { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

impl FromStr for FiscalYearSpec {
    type Err = ProfileEngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let malformed = || {
            ProfileEngineError::MalformedInput(format!(
                "Invalid fiscal year '{}'. Expected 'YYYY' or 'YYYY-YYYY'",
                s
            ))
        };
        let parse_year = |part: &str| -> Result<i32> {
            let part = part.trim();
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed());
            }
            part.parse().map_err(|_| malformed())
        };

        match trimmed.split_once('-') {
            None => parse_year(trimmed).map(Self::Single),
            Some((start, end)) => {
                let (start, end) = (parse_year(start)?, parse_year(end)?);
                if start > end {
                    return Err(ProfileEngineError::MalformedInput(format!(
                        "Fiscal year range '{}' ends before it starts",
                        s
                    )));
                }
                if start == end {
                    return Ok(Self::Single(start));
                }
                Ok(Self::Range { start, end })
            }
        }
    }
}

impl TryFrom<String> for FiscalYearSpec {
    type Error = ProfileEngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FiscalYearSpec> for String {
    fn from(spec: FiscalYearSpec) -> Self {
        spec.to_string()
    }
}

/// Translates a relative token into the label shown for it.
///
/// Without a spec the symbolic label is returned. Under a range spec only `N` and `N-1`
/// have an absolute year; older tokens keep their symbolic label.
pub fn normalize_year(spec: Option<&FiscalYearSpec>, token: YearToken) -> String {
    match spec {
        None => token.label(),
        Some(FiscalYearSpec::Single(year)) => i32::try_from(token.offset())
            .ok()
            .and_then(|offset| year.checked_sub(offset))
            .map(|absolute| absolute.to_string())
            .unwrap_or_else(|| token.label()),
        Some(FiscalYearSpec::Range { start, end }) => match token.offset() {
            0 => end.to_string(),
            1 => start.to_string(),
            _ => token.label(),
        },
    }
}

/// The periods a snapshot carries data for, most recent first.
///
/// An explicit `available_years` list from a multi-document merge wins. Otherwise there are
/// exactly two periods, `[N, N-1]`; a fiscal year spec only changes how they are labelled
/// (see [`YearNormalizer::label`]).
pub fn available_years(metadata: Option<&RatioMetadata>) -> Vec<YearToken> {
    match metadata {
        Some(meta) if !meta.available_years.is_empty() => {
            let mut years = meta.available_years.clone();
            years.sort();
            years.dedup();
            years
        }
        _ => vec![YearToken::CURRENT, YearToken::PREVIOUS],
    }
}

/// Whether uploading documents for `target` warrants a new profile next to an existing one.
pub fn should_create_new_profile(
    existing: Option<&FiscalYearSpec>,
    target: Option<&FiscalYearSpec>,
) -> bool {
    match (existing, target) {
        (Some(existing), Some(target)) => !existing.covers(target),
        _ => true,
    }
}

/// [`normalize_year`] plus the absolute years a merge actually observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearNormalizer {
    spec: Option<FiscalYearSpec>,
    observed: BTreeMap<YearToken, i32>,
}

impl YearNormalizer {
    pub fn new(spec: Option<FiscalYearSpec>) -> Self {
        Self {
            spec,
            observed: BTreeMap::new(),
        }
    }

    pub fn with_year_mapping(mut self, mapping: &BTreeMap<i32, YearToken>) -> Self {
        self.observed = mapping.iter().map(|(year, token)| (*token, *year)).collect();
        self
    }

    pub fn for_snapshot(snapshot: &FinancialSnapshot) -> Self {
        let normalizer = Self::new(snapshot.fiscal_year);
        match &snapshot.ratios.metadata.multi_document {
            Some(multi) => normalizer.with_year_mapping(&multi.year_mapping),
            None => normalizer,
        }
    }

    pub fn spec(&self) -> Option<&FiscalYearSpec> {
        self.spec.as_ref()
    }

    pub fn label(&self, token: YearToken) -> String {
        match self.observed.get(&token) {
            Some(year) => year.to_string(),
            None => normalize_year(self.spec.as_ref(), token),
        }
    }

    /// Keys to try, in order, when looking a token up in an extracted year map.
    pub fn lookup_keys(&self, token: YearToken) -> Vec<String> {
        let mut keys = vec![self.label(token), token.label(), token.compact_label()];
        let mut seen = std::collections::HashSet::new();
        keys.retain(|k| seen.insert(k.clone()));
        keys
    }
}
