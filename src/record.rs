//! Business record value type and field cleaning.
//!
//! Records carry no identity beyond their field content. Every field except
//! `name` and `source_query` is optional; absent data is an explicit `None`
//! that serializes as `null` rather than being silently omitted, so sinks
//! always see the full schema.

use serde::{Deserialize, Serialize};

/// Geographic point attached to a record when the detail view exposes one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One extracted business listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: String,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub category: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours: Option<String>,
    pub price_level: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// Query string whose task produced this record.
    pub source_query: String,
}

impl BusinessRecord {
    /// Create a record with only the required fields populated.
    pub fn new(name: impl Into<String>, source_query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rating: None,
            review_count: None,
            category: None,
            address: None,
            phone: None,
            website: None,
            hours: None,
            price_level: None,
            coordinates: None,
            source_query: source_query.into(),
        }
    }
}

/// Collapse whitespace runs and trim. Returns None for empty results so a
/// field full of whitespace reads as absent.
pub fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Parse a rating like "4.5" or "4,5" out of arbitrary text, accepting only
/// values in the 0..=5 range the target interface can produce.
pub fn parse_rating(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', ".");
    let numeric: String = cleaned
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = numeric.parse().ok()?;
    if (0.0..=5.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Extract a review count from text like "(1,234)" or "1234 reviews".
pub fn parse_review_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Keep only characters plausible in a phone number, collapsing whitespace.
pub fn clean_phone(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
        .collect();
    clean_text(&kept)
}

/// Accept a website field only when it is already an http(s) URL or a bare
/// hostname the detail panel commonly shows; bare hostnames get a scheme.
pub fn clean_website(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(trimmed.to_string());
    }
    // Detail panels render the authority without a scheme ("example.com").
    if trimmed.contains('.') && !trimmed.contains(char::is_whitespace) {
        return Some(format!("https://{}", trimmed));
    }
    None
}

/// Pull the closing-time portion out of "Open ⋅ Closes 10 PM" style text,
/// falling back to the whole cleaned string.
pub fn clean_hours(raw: &str) -> Option<String> {
    let text = raw.replace('\u{202f}', " ");
    let chosen = match text.split('⋅').nth(1) {
        Some(tail) => tail,
        None => text.as_str(),
    };
    clean_text(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  Joe's   Diner \n"), Some("Joe's Diner".to_string()));
        assert_eq!(clean_text("   \t "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("4.5"), Some(4.5));
        assert_eq!(parse_rating("4,5"), Some(4.5));
        assert_eq!(parse_rating("Rated 3.0 stars"), Some(3.0));
        assert_eq!(parse_rating("9.5"), None);
        assert_eq!(parse_rating("no digits"), None);
    }

    #[test]
    fn test_parse_review_count() {
        assert_eq!(parse_review_count("(1,234)"), Some(1234));
        assert_eq!(parse_review_count("87 reviews"), Some(87));
        assert_eq!(parse_review_count("none"), None);
    }

    #[test]
    fn test_clean_phone() {
        assert_eq!(clean_phone("+1 (212) 555-0134"), Some("+1 (212) 555-0134".to_string()));
        assert_eq!(clean_phone("call: +1 212 555 0134"), Some("+1 212 555 0134".to_string()));
        assert_eq!(clean_phone("???"), None);
    }

    #[test]
    fn test_clean_website() {
        assert_eq!(clean_website("https://example.com"), Some("https://example.com".to_string()));
        assert_eq!(clean_website("example.com"), Some("https://example.com".to_string()));
        assert_eq!(clean_website("not a url"), None);
        assert_eq!(clean_website(""), None);
    }

    #[test]
    fn test_clean_hours_splits_status_prefix() {
        assert_eq!(clean_hours("Open ⋅ Closes 10 PM"), Some("Closes 10 PM".to_string()));
        assert_eq!(clean_hours("24 hours"), Some("24 hours".to_string()));
    }

    #[test]
    fn test_optional_fields_serialize_as_null() {
        let record = BusinessRecord::new("Cafe Uno", "coffee in soho");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("rating").unwrap().is_null());
        assert!(json.get("address").unwrap().is_null());
        assert_eq!(json.get("name").unwrap(), "Cafe Uno");
    }
}
