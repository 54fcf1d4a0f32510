use crate::error::{ProfileEngineError, Result};
use log::warn;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Parses an amount as printed in an OCR'd statement.
///
/// Everything except digits, `.`, `,` and `-` is stripped (currency, thousands spaces,
/// non-breaking spaces) and a decimal comma becomes a decimal point, so `"12 345,50 MAD"`
/// parses to `12345.5`. Mixed separators such as `"1,234.56"` are rejected rather than
/// guessed at.
pub fn parse_amount_str(raw: &str) -> Result<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == "-" {
        return Err(ProfileEngineError::MalformedInput(format!(
            "No numeric content in amount '{}'",
            raw
        )));
    }

    let value: f64 = cleaned.parse().map_err(|_| {
        ProfileEngineError::MalformedInput(format!("Unparsable amount '{}'", raw))
    })?;

    finite(value).ok_or_else(|| {
        ProfileEngineError::MalformedInput(format!("Non-finite amount '{}'", raw))
    })
}

/// Converts an arbitrary JSON value into an amount. Malformed values are logged and
/// treated as missing.
pub fn amount_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64().and_then(finite),
        Value::String(s) => match parse_amount_str(s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{}; treating as missing", e);
                None
            }
        },
        other => {
            warn!("Unexpected amount value {}; treating as missing", other);
            None
        }
    }
}

/// `deserialize_with` helper for optional amounts that may arrive as numbers or strings.
pub fn deserialize_lenient_amount<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(amount_from_value))
}

pub fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}
