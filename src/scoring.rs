//! Check registry, achievable-maximum computation and the two-track final
//! score aggregation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One atomic verification with a fixed score contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub description: &'static str,
    pub impact: i32,
}

pub const DOMAIN_EXACT_MATCH: &str = "DomainExactMatch";
pub const DOMAIN_NO_SIMILARITY: &str = "DomainNoSimilarity";
pub const DOMAIN_IMPERSONATION: &str = "DomainImpersonation";
pub const FREE_MAIL_MATCH: &str = "freeMailMatch";
pub const COMPANY_IDENTIFIED: &str = "CompanyIdentified";
pub const COMPANY_VERIFIED: &str = "CompanyVerified";
pub const REALISM_CHECK: &str = "RealismCheck";
pub const CORRECT_PHONE_NUMBER: &str = "CorrectPhoneNumber";
pub const MALICIOUS_URL_FOUND: &str = "MaliciousURLFound";
pub const EXECUTABLE_FILE_FOUND: &str = "ExecutableFileFound";

pub static ALL_CHECKS: &[Check] = &[
    Check {
        name: DOMAIN_EXACT_MATCH,
        description: "Sender domain exactly matches a known good entry",
        impact: 30,
    },
    Check {
        name: DOMAIN_NO_SIMILARITY,
        description: "Sender domain not in database and no close matches",
        impact: 17,
    },
    Check {
        name: DOMAIN_IMPERSONATION,
        description: "Sender domain similar to a known domain (likely impersonation)",
        impact: 0,
    },
    Check {
        name: FREE_MAIL_MATCH,
        description: "Sender is from a free mail provider, which is not professional for business",
        impact: 12,
    },
    Check {
        name: COMPANY_IDENTIFIED,
        description: "Content analysis identifies the claimed company",
        impact: 3,
    },
    Check {
        name: COMPANY_VERIFIED,
        description: "Sender's domain matches the company they claim to be",
        impact: 20,
    },
    Check {
        name: REALISM_CHECK,
        description: "Content judged realistic (no ludicrous offers or demands)",
        impact: 25,
    },
    Check {
        name: CORRECT_PHONE_NUMBER,
        description: "Phone number is valid and matches the company",
        impact: 4,
    },
    Check {
        name: MALICIOUS_URL_FOUND,
        description: "No URL in the email was identified as malicious or suspicious",
        impact: 10,
    },
    Check {
        name: EXECUTABLE_FILE_FOUND,
        description: "No file in the email was identified as an executable",
        impact: 3,
    },
];

const DOMAIN_OUTCOMES: &[&str] = &[
    DOMAIN_EXACT_MATCH,
    DOMAIN_NO_SIMILARITY,
    DOMAIN_IMPERSONATION,
    FREE_MAIL_MATCH,
];

const CONTENT_CHECKS: &[&str] = &[
    COMPANY_IDENTIFIED,
    COMPANY_VERIFIED,
    REALISM_CHECK,
    CORRECT_PHONE_NUMBER,
];

pub fn check(name: &str) -> Option<&'static Check> {
    ALL_CHECKS.iter().find(|c| c.name == name)
}

/// Impact of a named check, zero for unknown names.
pub fn impact(name: &str) -> i32 {
    check(name).map(|c| c.impact).unwrap_or(0)
}

fn positive_impact(name: &str) -> i32 {
    impact(name).max(0)
}

/// Caller-selectable check categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Domain,
    Urls,
    Attachments,
    TextAnalysis,
    RenderedAnalysis,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Domain,
        Category::Urls,
        Category::Attachments,
        Category::TextAnalysis,
        Category::RenderedAnalysis,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Category::Domain => "checkDomain",
            Category::Urls => "checkUrls",
            Category::Attachments => "checkAttachments",
            Category::TextAnalysis => "checkTextAnalysis",
            Category::RenderedAnalysis => "checkRenderedAnalysis",
        }
    }
}

/// Per-request category switches. Absent categories are enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnabledChecks(HashMap<String, bool>);

impl EnabledChecks {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, bool>) -> Self {
        Self(map)
    }

    pub fn with(mut self, category: Category, enabled: bool) -> Self {
        self.0.insert(category.key().to_string(), enabled);
        self
    }

    pub fn is_enabled(&self, category: Category) -> bool {
        self.0.get(category.key()).copied().unwrap_or(true)
    }
}

/// Highest score a request can reach given its enabled categories.
///
/// Domain outcomes are mutually exclusive, so only the best one counts. The
/// content checks count once even when both content paths run because each
/// path is normalised separately against this same maximum.
pub fn max_achievable_score(enabled: &EnabledChecks) -> i32 {
    let mut total = 0;
    if enabled.is_enabled(Category::Domain) {
        total += DOMAIN_OUTCOMES
            .iter()
            .map(|name| positive_impact(name))
            .max()
            .unwrap_or(0);
    }
    if enabled.is_enabled(Category::Urls) {
        total += positive_impact(MALICIOUS_URL_FOUND);
    }
    if enabled.is_enabled(Category::Attachments) {
        total += positive_impact(EXECUTABLE_FILE_FOUND);
    }
    if enabled.is_enabled(Category::TextAnalysis) || enabled.is_enabled(Category::RenderedAnalysis)
    {
        total += CONTENT_CHECKS.iter().map(|name| positive_impact(name)).sum::<i32>();
    }
    total
}

/// Applies a category's impact at most once for one content path.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryCredit {
    credited: bool,
}

impl CategoryCredit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the impact to add: the check's impact the first time, zero after.
    pub fn apply(&mut self, check_name: &str) -> i32 {
        if self.credited {
            return 0;
        }
        self.credited = true;
        impact(check_name)
    }

    pub fn is_credited(&self) -> bool {
        self.credited
    }
}

/// Score contributions of the content checks for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathImpacts {
    pub company_identified: i32,
    pub company_verified: i32,
    pub realism: i32,
    pub contact_method: i32,
}

impl PathImpacts {
    pub fn total(&self) -> i32 {
        self.company_identified + self.company_verified + self.realism + self.contact_method
    }
}

/// Running totals folded from the concluded tasks.
///
/// Each slot is written once per task kind, so the fold does not depend on
/// the order in which tasks completed.
#[derive(Debug, Clone, Default)]
pub struct ScoreAccumulator {
    domain: Option<i32>,
    urls: Option<i32>,
    attachments: Option<i32>,
    text: Option<PathImpacts>,
    rendered: Option<PathImpacts>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_domain(&mut self, impact: i32) {
        self.domain = Some(impact);
    }

    pub fn record_urls(&mut self, impact: i32) {
        self.urls = Some(impact);
    }

    pub fn record_attachments(&mut self, impact: i32) {
        self.attachments = Some(impact);
    }

    pub fn record_text(&mut self, impacts: PathImpacts) {
        self.text = Some(impacts);
    }

    pub fn record_rendered(&mut self, impacts: PathImpacts) {
        self.rendered = Some(impacts);
    }

    pub fn base(&self) -> i32 {
        self.domain.unwrap_or(0) + self.urls.unwrap_or(0) + self.attachments.unwrap_or(0)
    }

    pub fn finish(&self, max_score: i32) -> FinalScores {
        let base = self.base();
        let text = base + self.text.map(|p| p.total()).unwrap_or(0);
        let rendered = base + self.rendered.map(|p| p.total()).unwrap_or(0);
        FinalScores {
            base_score: base,
            final_score_text: text,
            final_score_rendered: rendered,
            max_possible_score: max_score,
            text_percentage: percentage(text, max_score),
            rendered_percentage: percentage(rendered, max_score),
        }
    }
}

fn percentage(score: i32, max_score: i32) -> f64 {
    if max_score > 0 {
        100.0 * f64::from(score) / f64::from(max_score)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalScores {
    pub base_score: i32,
    pub final_score_text: i32,
    pub final_score_rendered: i32,
    pub max_possible_score: i32,
    pub text_percentage: f64,
    pub rendered_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names_are_unique() {
        for (i, a) in ALL_CHECKS.iter().enumerate() {
            for b in &ALL_CHECKS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn test_max_score_all_enabled() {
        // 30 (best domain) + 10 + 3 + (3 + 20 + 25 + 4)
        assert_eq!(max_achievable_score(&EnabledChecks::all()), 95);
    }

    #[test]
    fn test_max_score_domain_only_is_best_outcome_not_sum() {
        let enabled = EnabledChecks::all()
            .with(Category::Urls, false)
            .with(Category::Attachments, false)
            .with(Category::TextAnalysis, false)
            .with(Category::RenderedAnalysis, false);
        assert_eq!(max_achievable_score(&enabled), impact(DOMAIN_EXACT_MATCH));
        assert_ne!(
            max_achievable_score(&enabled),
            DOMAIN_OUTCOMES.iter().map(|n| impact(n)).sum::<i32>()
        );
    }

    #[test]
    fn test_max_score_content_counted_once() {
        let only_text = EnabledChecks::all()
            .with(Category::Domain, false)
            .with(Category::Urls, false)
            .with(Category::Attachments, false)
            .with(Category::RenderedAnalysis, false);
        let both = EnabledChecks::all()
            .with(Category::Domain, false)
            .with(Category::Urls, false)
            .with(Category::Attachments, false);
        assert_eq!(max_achievable_score(&only_text), 52);
        assert_eq!(max_achievable_score(&both), 52);
    }

    #[test]
    fn test_everything_disabled() {
        let mut enabled = EnabledChecks::all();
        for category in Category::ALL {
            enabled = enabled.with(category, false);
        }
        assert_eq!(max_achievable_score(&enabled), 0);
        assert_eq!(ScoreAccumulator::new().finish(0).text_percentage, 0.0);
    }

    #[test]
    fn test_enabled_checks_deserialize() {
        let enabled: EnabledChecks =
            serde_json::from_str(r#"{"checkUrls": false, "checkDomain": true}"#).unwrap();
        assert!(!enabled.is_enabled(Category::Urls));
        assert!(enabled.is_enabled(Category::Domain));
        assert!(enabled.is_enabled(Category::Attachments));
    }

    #[test]
    fn test_category_credit_applies_once() {
        let mut credit = CategoryCredit::new();
        let total: i32 = (0..5).map(|_| credit.apply(CORRECT_PHONE_NUMBER)).sum();
        assert_eq!(total, impact(CORRECT_PHONE_NUMBER));
        assert!(credit.is_credited());
    }

    #[test]
    fn test_accumulator_two_tracks() {
        let mut acc = ScoreAccumulator::new();
        acc.record_domain(30);
        acc.record_urls(10);
        acc.record_attachments(3);
        acc.record_text(PathImpacts {
            company_identified: 3,
            company_verified: 20,
            realism: 25,
            contact_method: 4,
        });
        // rendered path missing: contributes nothing beyond the base
        let scores = acc.finish(95);
        assert_eq!(scores.base_score, 43);
        assert_eq!(scores.final_score_text, 95);
        assert_eq!(scores.final_score_rendered, 43);
        assert!((scores.text_percentage - 100.0).abs() < f64::EPSILON);
    }
}
