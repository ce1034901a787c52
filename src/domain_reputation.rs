use crate::corpus::DomainCorpus;
use crate::error::{AnalysisError, AnalysisResult};
use crate::scoring;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_FREE_MAIL_PROVIDERS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "aol.com",
    "icloud.com",
    "protonmail.com",
    "zoho.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainClassification {
    FreeMailProvider,
    ExactMatch { matched: String },
    Impersonation { matched: String },
    NoSimilarity,
}

impl DomainClassification {
    pub fn check_name(&self) -> &'static str {
        match self {
            DomainClassification::FreeMailProvider => scoring::FREE_MAIL_MATCH,
            DomainClassification::ExactMatch { .. } => scoring::DOMAIN_EXACT_MATCH,
            DomainClassification::Impersonation { .. } => scoring::DOMAIN_IMPERSONATION,
            DomainClassification::NoSimilarity => scoring::DOMAIN_NO_SIMILARITY,
        }
    }
}

/// Payload of the `domainAnalysis` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainAnalysisResult {
    pub status: String,
    pub message: String,
    pub matched_domain: String,
    pub score_impact: i32,
    pub suspect_subdomain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainAnalysisResult {
    pub fn failed(subdomain: &str, error: &AnalysisError) -> Self {
        Self {
            status: "Error".to_string(),
            message: "Domain analysis could not be completed.".to_string(),
            matched_domain: String::new(),
            score_impact: 0,
            suspect_subdomain: subdomain.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Classifies sender domains against the known-organisation corpus.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    free_mail_providers: HashSet<String>,
}

impl Default for DomainMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FREE_MAIL_PROVIDERS.iter().map(|d| d.to_string()))
    }
}

impl DomainMatcher {
    pub fn new(free_mail_providers: impl IntoIterator<Item = String>) -> Self {
        Self {
            free_mail_providers: free_mail_providers
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    pub fn is_free_mail_provider(&self, domain: &str) -> bool {
        self.free_mail_providers.contains(&domain.to_lowercase())
    }

    pub fn classify(
        &self,
        corpus: &dyn DomainCorpus,
        domain: &str,
    ) -> AnalysisResult<DomainClassification> {
        if self.is_free_mail_provider(domain) {
            return Ok(DomainClassification::FreeMailProvider);
        }

        let ascii = normalize_domain(domain);
        if corpus.contains(&ascii)? {
            return Ok(DomainClassification::ExactMatch { matched: ascii });
        }

        let threshold = similarity_threshold(ascii.len());
        let hit = corpus.find_first(&mut |entry: &str| {
            levenshtein(&ascii, &entry.to_lowercase()) <= threshold
        })?;

        Ok(match hit {
            Some(matched) => DomainClassification::Impersonation { matched },
            None => DomainClassification::NoSimilarity,
        })
    }

    /// Runs the classification off the async runtime and builds the event payload.
    /// Returns the payload and the time spent reading the corpus.
    pub async fn analyze(
        self: Arc<Self>,
        corpus: Arc<dyn DomainCorpus>,
        domain: String,
        subdomain: String,
    ) -> (DomainAnalysisResult, Duration) {
        let started = Instant::now();
        let lookup_domain = domain.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            self.classify(corpus.as_ref(), &lookup_domain)
        })
        .await
        .unwrap_or_else(|e| Err(AnalysisError::DataSource(format!("corpus scan aborted: {e}"))));
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(classification) => build_result(classification, &domain, &subdomain),
            Err(e) => {
                log::warn!("Domain analysis failed for {domain}: {e}");
                DomainAnalysisResult::failed(&subdomain, &e)
            }
        };
        (result, elapsed)
    }
}

fn build_result(
    classification: DomainClassification,
    domain: &str,
    subdomain: &str,
) -> DomainAnalysisResult {
    let score_impact = scoring::impact(classification.check_name());
    let status = classification.check_name().to_string();
    let (message, matched_domain) = match classification {
        DomainClassification::FreeMailProvider => (
            "Domain is from a free mail provider.".to_string(),
            domain.to_string(),
        ),
        DomainClassification::ExactMatch { matched } => {
            ("Domain is in the known database.".to_string(), matched)
        }
        DomainClassification::Impersonation { matched } => (
            format!("A similar domain '{matched}' is in the known database."),
            matched,
        ),
        DomainClassification::NoSimilarity => (
            "Domain not in database, and no similarities found.".to_string(),
            normalize_domain(domain),
        ),
    };
    DomainAnalysisResult {
        status,
        message,
        matched_domain,
        score_impact,
        suspect_subdomain: subdomain.to_string(),
        error: None,
    }
}

/// IDNA-encodes and lower-cases a domain; falls back to lower-casing alone.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().trim_end_matches('.').to_lowercase();
    match url::Host::parse(&lower) {
        Ok(url::Host::Domain(ascii)) => ascii,
        _ => lower,
    }
}

/// Edit distance tolerated for a candidate of the given length.
pub fn similarity_threshold(len: usize) -> usize {
    match len {
        0..=11 => 1,
        12..=15 => 2,
        _ => (len as f64 * 0.15).ceil() as usize,
    }
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::StaticCorpus;

    fn corpus() -> StaticCorpus {
        StaticCorpus::with_domains(["example.com", "paypal.com", "nationalgeographic.com"])
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("examp1e.com", "example.com"), 1);
    }

    #[test]
    fn test_threshold_scales_with_length() {
        assert_eq!(similarity_threshold(5), 1);
        assert_eq!(similarity_threshold(11), 1);
        assert_eq!(similarity_threshold(12), 2);
        assert_eq!(similarity_threshold(15), 2);
        assert_eq!(similarity_threshold(16), 3);
        assert_eq!(similarity_threshold(22), 4);
    }

    #[test]
    fn test_exact_match_for_every_corpus_entry() {
        let matcher = DomainMatcher::default();
        let corpus = corpus();
        for domain in ["example.com", "paypal.com", "nationalgeographic.com"] {
            assert_eq!(
                matcher.classify(&corpus, domain).unwrap(),
                DomainClassification::ExactMatch {
                    matched: domain.to_string()
                }
            );
        }
    }

    #[test]
    fn test_one_typo_is_impersonation() {
        let matcher = DomainMatcher::default();
        assert_eq!(
            matcher.classify(&corpus(), "examp1e.com").unwrap(),
            DomainClassification::Impersonation {
                matched: "example.com".to_string()
            }
        );
    }

    #[test]
    fn test_long_domain_tolerates_more_edits() {
        let matcher = DomainMatcher::default();
        // 22 characters, threshold 4, distance 3
        assert_eq!(
            matcher.classify(&corpus(), "natlonalge0graphlc.com").unwrap(),
            DomainClassification::Impersonation {
                matched: "nationalgeographic.com".to_string()
            }
        );
    }

    #[test]
    fn test_unrelated_domain_has_no_similarity() {
        let matcher = DomainMatcher::default();
        assert_eq!(
            matcher.classify(&corpus(), "totally-unrelated.org").unwrap(),
            DomainClassification::NoSimilarity
        );
    }

    #[test]
    fn test_first_hit_wins_in_corpus_order() {
        let matcher = DomainMatcher::default();
        let corpus = StaticCorpus::with_domains(["abcd.com", "abce.com"]);
        assert_eq!(
            matcher.classify(&corpus, "abcf.com").unwrap(),
            DomainClassification::Impersonation {
                matched: "abcd.com".to_string()
            }
        );
    }

    #[test]
    fn test_free_mail_short_circuits_corpus() {
        struct FailingCorpus;
        impl DomainCorpus for FailingCorpus {
            fn check_available(&self) -> AnalysisResult<()> {
                Ok(())
            }
            fn contains(&self, _: &str) -> AnalysisResult<bool> {
                Err(AnalysisError::DataSource("boom".into()))
            }
            fn find_first(
                &self,
                _: &mut dyn FnMut(&str) -> bool,
            ) -> AnalysisResult<Option<String>> {
                Err(AnalysisError::DataSource("boom".into()))
            }
            fn domains_for_label(&self, _: &str) -> AnalysisResult<Vec<String>> {
                Ok(Vec::new())
            }
        }

        let matcher = DomainMatcher::default();
        assert_eq!(
            matcher.classify(&FailingCorpus, "Gmail.com").unwrap(),
            DomainClassification::FreeMailProvider
        );
        assert!(matches!(
            matcher.classify(&FailingCorpus, "example.com"),
            Err(AnalysisError::DataSource(_))
        ));
    }

    #[test]
    fn test_idn_is_punycoded() {
        assert_eq!(normalize_domain("Bücher.de"), "xn--bcher-kva.de");
        assert_eq!(normalize_domain("EXAMPLE.com."), "example.com");
    }

    #[tokio::test]
    async fn test_analyze_builds_payload() {
        let matcher = Arc::new(DomainMatcher::default());
        let (result, _) = matcher
            .analyze(
                Arc::new(corpus()),
                "examp1e.com".to_string(),
                "mail.examp1e.com".to_string(),
            )
            .await;
        assert_eq!(result.status, "DomainImpersonation");
        assert_eq!(result.matched_domain, "example.com");
        assert_eq!(result.score_impact, 0);
        assert_eq!(result.suspect_subdomain, "mail.examp1e.com");
    }
}
