//! Destination number validation.
//!
//! Destinations are written into SMS-SUBMIT address fields, which carry only
//! digits, so they must be an optional `+` followed by digits. Sender patterns
//! are never validated: alphanumeric senders ("Bank", "Swisscom") are common.

/// Destination validation errors with helpful messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NumberError {
    #[error("destination number is empty")]
    Empty,

    #[error("destination {number:?} is too short (minimum {min} digits)")]
    TooShort { number: String, min: usize },

    #[error("destination {number:?} is too long (maximum {max} digits)")]
    TooLong { number: String, max: usize },

    #[error("destination {number:?} contains invalid characters: {chars}")]
    InvalidCharacters { number: String, chars: String },
}

const MIN_DIGITS: usize = 3;
const MAX_DIGITS: usize = 20;

/// Validate a destination number: `+` (optional) followed by 3..=20 digits.
pub fn validate_destination(number: &str) -> Result<(), NumberError> {
    if number.is_empty() {
        return Err(NumberError::Empty);
    }
    let digits = number.strip_prefix('+').unwrap_or(number);

    let invalid: String = digits.chars().filter(|c| !c.is_ascii_digit()).collect();
    if !invalid.is_empty() {
        let mut chars: Vec<char> = invalid.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        return Err(NumberError::InvalidCharacters {
            number: number.to_string(),
            chars: chars.into_iter().map(|c| format!("{:?}", c)).collect::<Vec<_>>().join(", "),
        });
    }
    if digits.len() < MIN_DIGITS {
        return Err(NumberError::TooShort {
            number: number.to_string(),
            min: MIN_DIGITS,
        });
    }
    if digits.len() > MAX_DIGITS {
        return Err(NumberError::TooLong {
            number: number.to_string(),
            max: MAX_DIGITS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_international_and_national_numbers() {
        assert_eq!(validate_destination("+41791234567"), Ok(()));
        assert_eq!(validate_destination("0791234567"), Ok(()));
        assert_eq!(validate_destination("+100"), Ok(()));
    }

    #[test]
    fn rejects_formatting_characters() {
        match validate_destination("+41 79-123") {
            Err(NumberError::InvalidCharacters { chars, .. }) => {
                assert_eq!(chars, "' ', '-'");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(validate_destination("++41791234567").is_err());
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(validate_destination(""), Err(NumberError::Empty));
        assert!(matches!(
            validate_destination("+12"),
            Err(NumberError::TooShort { min: 3, .. })
        ));
        assert!(matches!(
            validate_destination(&"1".repeat(21)),
            Err(NumberError::TooLong { max: 20, .. })
        ));
    }
}
