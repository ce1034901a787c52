use super::search::WebSearch;
use crate::scoring::{self, CategoryCredit};
use regex::Regex;
use serde::Serialize;

/// Words in a number's search result title that mark it as reported.
pub const BANNED_TITLE_WORDS: &[&str] = &["scam", "fraud", "warning"];

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumberValidation {
    pub phone_number: String,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMethodAnalysis {
    pub phone_numbers: Vec<PhoneNumberValidation>,
    pub score_impact: i32,
}

fn calling_code(country: &str) -> Option<&'static str> {
    match country.to_lowercase().as_str() {
        "gb" | "uk" => Some("44"),
        "us" | "ca" => Some("1"),
        "ie" => Some("353"),
        "au" => Some("61"),
        "nz" => Some("64"),
        "de" => Some("49"),
        "fr" => Some("33"),
        "nl" => Some("31"),
        "es" => Some("34"),
        "it" => Some("39"),
        "in" => Some("91"),
        _ => None,
    }
}

pub struct PhoneExtractor {
    candidate: Regex,
    country: String,
}

impl PhoneExtractor {
    pub fn new(country: &str) -> Self {
        Self {
            candidate: Regex::new(r"(?:\+|\b00)?\(?\d[\d\s().-]{8,22}\d").unwrap(),
            country: country.to_string(),
        }
    }

    /// Distinct phone numbers in the text, in international form where the
    /// region allows it.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut numbers: Vec<String> = Vec::new();
        for m in self.candidate.find_iter(text) {
            if let Some(number) = self.normalize(m.as_str()) {
                if !numbers.contains(&number) {
                    numbers.push(number);
                }
            }
        }
        numbers
    }

    fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return None;
        }
        if raw.starts_with('+') {
            return Some(format!("+{digits}"));
        }
        if let Some(rest) = digits.strip_prefix("00") {
            return Some(format!("+{rest}"));
        }
        match (calling_code(&self.country), digits.strip_prefix('0')) {
            (Some(code), Some(national)) => Some(format!("+{code}{national}")),
            (Some("1"), None) if digits.len() == 10 => Some(format!("+1{digits}")),
            _ => Some(digits),
        }
    }
}

/// Whether the number's top search result leads to a page titled with the
/// organisation's name and nothing marking it as a reported scam.
pub async fn validate_number(search: &dyn WebSearch, number: &str, organisation: &str) -> bool {
    if organisation.trim().is_empty() {
        return false;
    }
    let hits = match search.search(&format!("\"{number}\"")).await {
        Ok(hits) => hits,
        Err(e) => {
            log::debug!("Phone search for {number} failed: {e}");
            return false;
        }
    };
    let Some(first) = hits.first() else {
        return false;
    };
    let site_hits = match search.search(&first.display_link).await {
        Ok(hits) => hits,
        Err(e) => {
            log::debug!("Site search for {} failed: {e}", first.display_link);
            return false;
        }
    };
    let Some(site) = site_hits.first() else {
        return false;
    };
    let title = site.title.to_lowercase();
    title.contains(&organisation.to_lowercase())
        && !BANNED_TITLE_WORDS.iter().any(|w| title.contains(w))
}

/// Validates every number, crediting the category at most once.
pub async fn analyze_contact_methods(
    search: &dyn WebSearch,
    numbers: Vec<String>,
    organisation: &str,
) -> ContactMethodAnalysis {
    if numbers.is_empty() {
        return ContactMethodAnalysis {
            phone_numbers: Vec::new(),
            score_impact: scoring::impact(scoring::CORRECT_PHONE_NUMBER),
        };
    }

    let mut credit = CategoryCredit::new();
    let mut analysis = ContactMethodAnalysis::default();
    for number in numbers {
        let is_valid = validate_number(search, &number, organisation).await;
        if is_valid {
            analysis.score_impact += credit.apply(scoring::CORRECT_PHONE_NUMBER);
        }
        analysis.phone_numbers.push(PhoneNumberValidation {
            phone_number: number,
            is_valid,
        });
    }
    analysis
}
