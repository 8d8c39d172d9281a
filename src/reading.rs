//! Balance response parsing.
//!
//! Balances answer an output command with an ASCII line such as
//! `"+    123.45 g"`: a sign, whitespace, the magnitude and a unit. A line is
//! accepted as a reading when it starts with `+` or `-` and its first two
//! whitespace-separated tokens join into a signed decimal. Anything else,
//! including malformed numeric-looking lines, is `Reading::Unavailable`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Marker written to the log for a device that produced no value.
pub const UNAVAILABLE_MARKER: &str = "NA";

/// Marker written to the log for a device whose exchange failed.
pub const ERROR_MARKER: &str = "Error";

static SIGNED_DECIMAL: Lazy<Regex> = Lazy::new(|| {
    // Constant pattern, checked by the tests below.
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[+-](\d+\.?\d*|\.\d+)$").unwrap()
});

/// Outcome of polling one device for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// A parsed weight.
    Numeric(f64),
    /// The device answered nothing usable in time.
    Unavailable,
    /// The exchange itself failed (transport error).
    Error(String),
}

impl Reading {
    /// Returns the numeric value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Text stored in a log cell: the number, `NA` or `Error`.
    pub fn cell(&self) -> String {
        match self {
            Reading::Numeric(v) => v.to_string(),
            Reading::Unavailable => UNAVAILABLE_MARKER.to_string(),
            Reading::Error(_) => ERROR_MARKER.to_string(),
        }
    }

    /// Short operator-facing text for a probe result.
    pub fn preview(&self) -> String {
        match self {
            Reading::Numeric(v) => format!("{v:.2} g"),
            _ => "No Balance Detected".to_string(),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Numeric(v) => write!(f, "{v}"),
            Reading::Unavailable => f.write_str(UNAVAILABLE_MARKER),
            Reading::Error(msg) => write!(f, "{ERROR_MARKER} ({msg})"),
        }
    }
}

/// True if `line` looks like a balance reading (sign prefix).
pub fn is_reading_line(line: &str) -> bool {
    line.starts_with('+') || line.starts_with('-')
}

/// Parse one decoded response line.
pub fn parse_reading(line: &str) -> Reading {
    if !is_reading_line(line) {
        return Reading::Unavailable;
    }

    let mut tokens = line.split_whitespace();
    let (Some(sign), Some(magnitude)) = (tokens.next(), tokens.next()) else {
        return Reading::Unavailable;
    };

    let joined = format!("{sign}{magnitude}");
    if !SIGNED_DECIMAL.is_match(&joined) {
        return Reading::Unavailable;
    }

    joined
        .parse::<f64>()
        .map(Reading::Numeric)
        .unwrap_or(Reading::Unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spaced_sign_and_magnitude() {
        assert_eq!(parse_reading("+  123.45 g"), Reading::Numeric(123.45));
        assert_eq!(parse_reading("-     0.07 g"), Reading::Numeric(-0.07));
        assert_eq!(parse_reading("+ 12"), Reading::Numeric(12.0));
    }

    #[test]
    fn rejects_lines_without_sign_prefix() {
        assert_eq!(parse_reading("S"), Reading::Unavailable);
        assert_eq!(parse_reading(""), Reading::Unavailable);
        assert_eq!(parse_reading(" + 1.0 g"), Reading::Unavailable);
        assert_eq!(parse_reading("ES"), Reading::Unavailable);
    }

    #[test]
    fn malformed_numeric_lines_are_unavailable() {
        // Sign attached to the magnitude: tokens join to "+123.45g".
        assert_eq!(parse_reading("+123.45 g"), Reading::Unavailable);
        assert_eq!(parse_reading("+"), Reading::Unavailable);
        assert_eq!(parse_reading("- --.-- g"), Reading::Unavailable);
        assert_eq!(parse_reading("+ inf"), Reading::Unavailable);
        assert_eq!(parse_reading("+ 1e3"), Reading::Unavailable);
        assert_eq!(parse_reading("+ 1.2.3"), Reading::Unavailable);
    }

    #[test]
    fn cells_use_log_markers() {
        assert_eq!(Reading::Numeric(12.5).cell(), "12.5");
        assert_eq!(Reading::Unavailable.cell(), "NA");
        assert_eq!(Reading::Error("broken pipe".into()).cell(), "Error");
    }

    #[test]
    fn preview_text() {
        assert_eq!(Reading::Numeric(3.14159).preview(), "3.14 g");
        assert_eq!(Reading::Unavailable.preview(), "No Balance Detected");
        assert_eq!(Reading::Error("x".into()).preview(), "No Balance Detected");
    }
}
