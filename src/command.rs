//! Balance output commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request sent to a balance at every exchange.
///
/// Configuration files spell it with the wire string (`"O8"`, `"S"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputCommand {
    /// `O8`: output immediately, stable or unstable.
    #[default]
    Continuous,
    /// `S`: output only once the reading is stable.
    StableOnly,
}

impl OutputCommand {
    /// The ASCII request string, without line terminator.
    pub fn wire(&self) -> &'static str {
        match self {
            OutputCommand::Continuous => "O8",
            OutputCommand::StableOnly => "S",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            OutputCommand::Continuous => "Immediate Output (Stable or Unstable Readings)",
            OutputCommand::StableOnly => "Immediate Output (Stable Readings Only)",
        }
    }

    /// Resolve a selection label. Unknown labels fall back to `Continuous`.
    pub fn from_label(label: &str) -> Self {
        if label.contains("Stable Readings Only") {
            OutputCommand::StableOnly
        } else {
            OutputCommand::Continuous
        }
    }
}

impl fmt::Display for OutputCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

impl FromStr for OutputCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "o8" | "continuous" => Ok(OutputCommand::Continuous),
            "s" | "stable" => Ok(OutputCommand::StableOnly),
            other => Err(format!(
                "Unknown output command '{}'. Must be one of: O8, S",
                other
            )),
        }
    }
}

impl TryFrom<String> for OutputCommand {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputCommand> for String {
    fn from(value: OutputCommand) -> Self {
        value.wire().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings() {
        assert_eq!(OutputCommand::Continuous.wire(), "O8");
        assert_eq!(OutputCommand::StableOnly.wire(), "S");
    }

    #[test]
    fn parses_short_names_case_insensitively() {
        assert_eq!("O8".parse::<OutputCommand>(), Ok(OutputCommand::Continuous));
        assert_eq!("stable".parse::<OutputCommand>(), Ok(OutputCommand::StableOnly));
        assert_eq!(" s ".parse::<OutputCommand>(), Ok(OutputCommand::StableOnly));
        assert!("T".parse::<OutputCommand>().is_err());
    }

    #[test]
    fn labels_round_trip_and_fall_back() {
        for cmd in [OutputCommand::Continuous, OutputCommand::StableOnly] {
            assert_eq!(OutputCommand::from_label(cmd.label()), cmd);
        }
        assert_eq!(
            OutputCommand::from_label("something else"),
            OutputCommand::Continuous
        );
    }
}
