//! Checks applied to run parameters before anything touches a device or the
//! filesystem.

use std::ops::RangeInclusive;

/// Characters that may not appear in a log filename.
pub const FORBIDDEN_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Validates a log filename (without extension).
///
/// # Arguments
///
/// * `name` - The filename as typed by the operator.
///
/// # Returns
///
/// * `Ok(())` if the name is usable.
/// * `Err(&'static str)` describing the first problem found.
pub fn is_valid_filename(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Filename cannot be empty");
    }
    if name.chars().any(char::is_whitespace) {
        return Err("Filename cannot contain spaces");
    }
    if name.contains(FORBIDDEN_FILENAME_CHARS) {
        return Err("Filename cannot contain any of \\ / : * ? \" < > |");
    }
    Ok(())
}

/// Validates that a value lies within an inclusive range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates a tick interval in seconds.
pub fn is_valid_interval(secs: u64) -> Result<(), &'static str> {
    is_in_range(secs, 1..=u64::MAX).map_err(|_| "Interval must be at least 1 second")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(is_valid_filename("test_run").is_ok());
        assert!(is_valid_filename("run-2024.05.01").is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(is_valid_filename("").is_err());
        assert!(is_valid_filename("my run").is_err());
        assert!(is_valid_filename("tab\there").is_err());
    }

    #[test]
    fn rejects_each_forbidden_character() {
        for c in FORBIDDEN_FILENAME_CHARS {
            let name = format!("a{c}b");
            assert!(is_valid_filename(&name).is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(is_valid_interval(0).is_err());
        assert!(is_valid_interval(1).is_ok());
        assert!(is_valid_interval(3600).is_ok());
    }
}
