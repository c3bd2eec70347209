//! Validation utilities module
//!
//! Common format checks shared by the answer validator and the contact-form
//! field checks. Patterns are compiled once and cached.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Returns a compiled email regex pattern
fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        // Local part cannot start/end with a dot or contain consecutive
        // dots; the domain requires at least one dot
        Regex::new(
            r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-](?:[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]*[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-])?@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$"
        ).expect("Invalid email regex pattern")
    })
}

/// Returns a compiled international phone regex pattern
fn phone_regex() -> &'static Regex {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    PHONE_REGEX.get_or_init(|| {
        // Optional + prefix, 7 to 15 digits, separators tolerated
        Regex::new(r"^\+?[0-9][0-9 ().-]{5,18}[0-9]$").expect("Invalid phone regex pattern")
    })
}

/// Returns a compiled URL regex pattern
fn url_regex() -> &'static Regex {
    static URL_REGEX: OnceLock<Regex> = OnceLock::new();
    URL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/$.?#].[^\s]*$")
            .expect("Invalid URL regex pattern")
    })
}

/// Validates an email address format.
pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    let Some(at_pos) = email.find('@') else {
        return false;
    };
    let local_part = &email[..at_pos];
    if local_part.is_empty() || local_part.len() > 64 {
        return false;
    }
    if local_part.starts_with('.') || local_part.ends_with('.') || local_part.contains("..") {
        return false;
    }
    email_regex().is_match(email)
}

/// Validates a phone number format.
pub fn validate_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=15).contains(&digits) {
        return false;
    }
    phone_regex().is_match(phone.trim())
}

/// Validates a URL format (any scheme; protocol policy is checked by the
/// answer validator).
pub fn validate_url(url: &str) -> bool {
    !url.is_empty() && url.len() <= 2048 && url_regex().is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("user.name+tag@sub.example.co"));
        assert!(!validate_email("invalid-email"));
        assert!(!validate_email(".starts.with.dot@example.com"));
        assert!(!validate_email("double..dot@example.com"));
        assert!(!validate_email("user@nodot"));
    }

    #[test]
    fn phones() {
        assert!(validate_phone("+14155552671"));
        assert!(validate_phone("0812345678"));
        assert!(validate_phone("+44 20 7946 0958"));
        assert!(!validate_phone("12345"));
        assert!(!validate_phone("not-a-phone"));
    }

    #[test]
    fn urls() {
        assert!(validate_url("https://example.com/path?q=1"));
        assert!(validate_url("http://example.com"));
        assert!(validate_url("ftp://files.example.com"));
        assert!(!validate_url("example.com"));
        assert!(!validate_url("https://bad url.com"));
        assert!(!validate_url(""));
    }
}
