use serde::{Deserialize, Serialize};

/// Category tags that condemn a URL regardless of score.
pub const MALICIOUS_CATEGORIES: &[&str] = &["phishing", "malware"];

/// What the scan platform reported for one URL.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScanReport {
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub malicious: bool,
    #[serde(default)]
    pub report_url: String,
}

/// Our own judgment of one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub url: String,
    pub score: i32,
    pub categories: Vec<String>,
    pub report_reference: String,
    pub platform_malicious: bool,
    pub final_decision: bool,
}

impl Verdict {
    pub fn from_report(url: &str, report: ScanReport) -> Self {
        let final_decision = final_decision(&report);
        Self {
            url: url.to_string(),
            score: report.score,
            categories: report.categories,
            report_reference: report.report_url,
            platform_malicious: report.malicious,
            final_decision,
        }
    }
}

/// Any one of: the platform flag, a positive score, or a condemning category.
pub fn final_decision(report: &ScanReport) -> bool {
    report.malicious
        || report.score > 0
        || report.categories.iter().any(|c| {
            MALICIOUS_CATEGORIES
                .iter()
                .any(|m| c.eq_ignore_ascii_case(m))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_signal_is_sufficient() {
        assert!(!final_decision(&ScanReport::default()));
        assert!(final_decision(&ScanReport {
            malicious: true,
            ..Default::default()
        }));
        assert!(final_decision(&ScanReport {
            score: 1,
            ..Default::default()
        }));
        assert!(final_decision(&ScanReport {
            categories: vec!["Phishing".to_string()],
            ..Default::default()
        }));
    }

    #[test]
    fn test_benign_categories_and_negative_score() {
        let report = ScanReport {
            score: -10,
            categories: vec!["ads".to_string(), "tracking".to_string()],
            ..Default::default()
        };
        assert!(!final_decision(&report));
    }

    #[test]
    fn test_verdict_keeps_platform_flag_separate() {
        let verdict = Verdict::from_report(
            "https://a.test/",
            ScanReport {
                score: 50,
                report_url: "https://scanner.test/result/1/".to_string(),
                ..Default::default()
            },
        );
        assert!(!verdict.platform_malicious);
        assert!(verdict.final_decision);
        assert_eq!(verdict.report_reference, "https://scanner.test/result/1/");
    }
}
