//! The two content-trust paths: the raw message and its rendered screenshot.

pub mod judge;
pub mod phone;
pub mod render;
pub mod search;

use crate::context::RequestContext;
use crate::corpus::DomainCorpus;
use crate::domain_utils::DomainUtils;
use crate::error::{AnalysisError, AnalysisResult};
use crate::message::Envelope;
use crate::sandbox::Sandbox;
use crate::scoring::{self, PathImpacts};
use judge::{ContentJudge, JudgeRequest, Judgment};
use phone::{ContactMethodAnalysis, PhoneExtractor};
use render::{Renderer, TextExtractor};
use search::WebSearch;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyIdentification {
    pub identified: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub score_impact: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyVerification {
    pub verified: bool,
    pub message: String,
    pub score_impact: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAnalysis {
    pub action_required: bool,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealismAnalysis {
    pub is_realistic: bool,
    pub reason: String,
    pub score_impact: i32,
}

/// Payload of the `textAnalysis` and `renderedAnalysis` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysisResult {
    pub company_identification: CompanyIdentification,
    pub company_verification: CompanyVerification,
    pub action_analysis: ActionAnalysis,
    pub summary: String,
    pub realism_analysis: RealismAnalysis,
    pub contact_method_analysis: ContactMethodAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContentAnalysisResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn impacts(&self) -> PathImpacts {
        PathImpacts {
            company_identified: self.company_identification.score_impact,
            company_verified: self.company_verification.score_impact,
            realism: self.realism_analysis.score_impact,
            contact_method: self.contact_method_analysis.score_impact,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub prompt: String,
    pub payload_limit_bytes: usize,
    pub country: String,
    pub render_timeout: Duration,
}

pub struct ContentAnalyzer {
    judge: Arc<dyn ContentJudge>,
    renderer: Arc<dyn Renderer>,
    ocr: Arc<dyn TextExtractor>,
    search: Arc<dyn WebSearch>,
    corpus: Arc<dyn DomainCorpus>,
    phones: PhoneExtractor,
    settings: ContentSettings,
}

impl ContentAnalyzer {
    pub fn new(
        judge: Arc<dyn ContentJudge>,
        renderer: Arc<dyn Renderer>,
        ocr: Arc<dyn TextExtractor>,
        search: Arc<dyn WebSearch>,
        corpus: Arc<dyn DomainCorpus>,
        settings: ContentSettings,
    ) -> Self {
        Self {
            judge,
            renderer,
            ocr,
            search,
            corpus,
            phones: PhoneExtractor::new(&settings.country),
            settings,
        }
    }

    /// Judges the raw message together with its image attachments.
    pub async fn analyze_text(&self, ctx: &RequestContext, envelope: &Envelope) -> ContentAnalysisResult {
        let prompt = format!(
            "This is the full EML file:\n{}\n{}",
            String::from_utf8_lossy(&envelope.raw),
            self.settings.prompt
        );
        let mut request = JudgeRequest::new(prompt, self.settings.payload_limit_bytes);
        for image in envelope.images() {
            if !request.try_add_image(&image.content_type, image.data.clone()) {
                log::debug!("[{}] Judge payload full, skipping remaining images", ctx.id());
                break;
            }
        }

        let judgment = match self.judge.judge(request).await {
            Ok(judgment) => judgment,
            Err(e) => {
                log::warn!("[{}] Text analysis failed: {e}", ctx.id());
                return ContentAnalysisResult::failed("Failed to analyse email content.");
            }
        };

        let numbers = self
            .phones
            .extract(&format!("{}\n{}", envelope.text, envelope.html));
        self.build_result(ctx, envelope, judgment, numbers).await
    }

    /// Renders the message, reads it back with OCR and judges the screenshot.
    pub async fn analyze_rendered(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        sandbox: &Sandbox,
    ) -> ContentAnalysisResult {
        let (screenshot, ocr_text) = match self.render_and_read(ctx, envelope, sandbox).await {
            Ok(rendered) => rendered,
            Err(e) => {
                log::warn!("[{}] Rendering failed: {e}", ctx.id());
                return ContentAnalysisResult::failed(format!("Failed to render email: {e}"));
            }
        };
        if ocr_text.is_empty() {
            log::info!("[{}] No text extracted from rendered email", ctx.id());
            return ContentAnalysisResult::failed("No text extracted from rendered email.");
        }

        let prompt = format!(
            "This is the email subject: {}\n The from email address: {}\n \
             There is a full screenshot of the email attached. {}",
            envelope.subject, envelope.from, self.settings.prompt
        );
        let mut request = JudgeRequest::new(prompt, self.settings.payload_limit_bytes);
        if !request.try_add_image("image/png", screenshot) {
            log::warn!("[{}] Screenshot exceeds the judge payload limit", ctx.id());
        }

        let judgment = match self.judge.judge(request).await {
            Ok(judgment) => judgment,
            Err(e) => {
                log::warn!("[{}] Rendered analysis failed: {e}", ctx.id());
                return ContentAnalysisResult::failed(
                    "Failed to analyse rendered email screenshot.",
                );
            }
        };

        let numbers = self.phones.extract(&ocr_text);
        self.build_result(ctx, envelope, judgment, numbers).await
    }

    async fn render_and_read(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        sandbox: &Sandbox,
    ) -> AnalysisResult<(Vec<u8>, String)> {
        let images = envelope.save_images(sandbox)?;
        let html = render::prepare_html(&envelope.html, &envelope.text, &images);
        let out_dir = sandbox.screenshots_dir()?;

        let path = ctx
            .run_with_limit(
                self.settings.render_timeout,
                self.renderer.render(&html, &out_dir),
            )
            .await?;
        let text = self.ocr.extract_text(&path).await?;
        let screenshot = tokio::fs::read(&path).await?;
        Ok((screenshot, text))
    }

    async fn build_result(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        judgment: Judgment,
        numbers: Vec<String>,
    ) -> ContentAnalysisResult {
        let mut result = ContentAnalysisResult {
            company_identification: CompanyIdentification {
                identified: judgment.company_found,
                name: judgment.company_name.clone(),
                score_impact: 0,
            },
            action_analysis: ActionAnalysis {
                action_required: judgment.action_required,
                action: judgment.action.clone(),
            },
            summary: judgment.summary_of_email.clone(),
            realism_analysis: RealismAnalysis {
                is_realistic: judgment.realistic,
                reason: judgment.realistic_reason.clone(),
                score_impact: if judgment.realistic {
                    scoring::impact(scoring::REALISM_CHECK)
                } else {
                    0
                },
            },
            ..Default::default()
        };

        if judgment.company_found {
            result.company_identification.score_impact =
                scoring::impact(scoring::COMPANY_IDENTIFIED);
            let verified = match self
                .verify_company(ctx, &judgment.company_name, &envelope.domain)
                .await
            {
                Ok(verified) => verified,
                Err(e) => {
                    log::warn!("[{}] Error verifying company: {e}", ctx.id());
                    false
                }
            };
            result.company_verification = if verified {
                CompanyVerification {
                    verified,
                    message: "The sender's domain aligns with the company they claim to be."
                        .to_string(),
                    score_impact: scoring::impact(scoring::COMPANY_VERIFIED),
                }
            } else {
                CompanyVerification {
                    verified,
                    message: "Could not verify the sender's domain against the identified company."
                        .to_string(),
                    score_impact: 0,
                }
            };
        }

        result.contact_method_analysis =
            phone::analyze_contact_methods(self.search.as_ref(), numbers, &judgment.company_name)
                .await;
        result
    }

    /// Checks the sender domain against the corpus entries for the company,
    /// then against the company's top search result.
    pub async fn verify_company(
        &self,
        ctx: &RequestContext,
        company: &str,
        sender_domain: &str,
    ) -> AnalysisResult<bool> {
        if sender_domain.is_empty() {
            return Ok(false);
        }

        let corpus = Arc::clone(&self.corpus);
        let label = company.to_string();
        let started = Instant::now();
        let known = tokio::task::spawn_blocking(move || corpus.domains_for_label(&label))
            .await
            .map_err(|e| AnalysisError::DataSource(format!("corpus lookup aborted: {e}")))?;
        ctx.record_corpus_time(started.elapsed());
        if known?.iter().any(|d| d.eq_ignore_ascii_case(sender_domain)) {
            return Ok(true);
        }

        let hits = self.search.search(company).await?;
        Ok(hits
            .first()
            .and_then(|hit| DomainUtils::url_host(&hit.link))
            .is_some_and(|host| host.eq_ignore_ascii_case(sender_domain)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::phone::tests::FakeSearch;
    use super::*;
    use crate::corpus::StaticCorpus;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Judge returning a fixed answer and remembering what it was shown.
    pub(crate) struct FakeJudge {
        pub judgment: Option<Judgment>,
        pub seen: Mutex<Vec<JudgeRequest>>,
    }

    impl FakeJudge {
        pub(crate) fn answering(judgment: Judgment) -> Self {
            Self {
                judgment: Some(judgment),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContentJudge for FakeJudge {
        async fn judge(&self, request: JudgeRequest) -> AnalysisResult<Judgment> {
            self.seen.lock().unwrap().push(request);
            self.judgment
                .clone()
                .ok_or_else(|| AnalysisError::ExternalService("judge unavailable".into()))
        }
    }

    /// Writes a placeholder PNG instead of launching a browser.
    pub(crate) struct FakeRenderer;

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, _html: &str, out_dir: &Path) -> AnalysisResult<PathBuf> {
            let path = out_dir.join("screenshot.png");
            tokio::fs::write(&path, b"\x89PNG").await?;
            Ok(path)
        }
    }

    pub(crate) struct FakeOcr(pub String);

    #[async_trait]
    impl TextExtractor for FakeOcr {
        async fn extract_text(&self, _image: &Path) -> AnalysisResult<String> {
            Ok(self.0.clone())
        }
    }

    pub(crate) fn paypal_judgment() -> Judgment {
        Judgment {
            company_found: true,
            company_name: "PayPal".to_string(),
            summary_of_email: "Account limited".to_string(),
            action_required: true,
            action: "Log in".to_string(),
            realistic: true,
            realistic_reason: "Typical notice".to_string(),
        }
    }

    pub(crate) fn settings() -> ContentSettings {
        ContentSettings {
            prompt: "judge".to_string(),
            payload_limit_bytes: 20 << 20,
            country: "gb".to_string(),
            render_timeout: Duration::from_secs(5),
        }
    }

    fn analyzer(judge: FakeJudge, ocr: &str, search: FakeSearch) -> ContentAnalyzer {
        ContentAnalyzer::new(
            Arc::new(judge),
            Arc::new(FakeRenderer),
            Arc::new(FakeOcr(ocr.to_string())),
            Arc::new(search),
            Arc::new(StaticCorpus::new().add("PayPal", "paypal.com")),
            settings(),
        )
    }

    fn envelope(domain: &str) -> Envelope {
        Envelope {
            subject: "Your account".to_string(),
            from: format!("Service <service@{domain}>"),
            sender_address: format!("service@{domain}"),
            sub_domain: domain.to_string(),
            domain: domain.to_string(),
            text: "Hello".to_string(),
            html: "<p>Hello</p>".to_string(),
            raw: b"Subject: Your account\r\n\r\nHello".to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_text_path_full_credit() {
        let analyzer = analyzer(
            FakeJudge::answering(paypal_judgment()),
            "",
            FakeSearch::default(),
        );
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let result = analyzer.analyze_text(&ctx, &envelope("paypal.com")).await;

        assert!(result.error.is_none());
        assert!(result.company_verification.verified);
        assert_eq!(result.impacts().total(), 3 + 20 + 25 + 4);
    }

    #[tokio::test]
    async fn test_unverified_company_falls_back_to_search() {
        let search = FakeSearch::default().with(
            "PayPal",
            "PayPal: Pay, Send Money",
            "https://www.paypal.com/uk/home",
            "www.paypal.com",
        );
        let analyzer = analyzer(FakeJudge::answering(paypal_judgment()), "", search);
        let ctx = RequestContext::new("t", Duration::from_secs(30));

        assert!(!analyzer
            .verify_company(&ctx, "PayPal", "paypa1-secure.test")
            .await
            .unwrap());
        assert!(analyzer
            .verify_company(&ctx, "PayPal", "paypal.com")
            .await
            .unwrap());
        assert!(analyzer
            .verify_company(&ctx, "Unknown Org", "paypal.com")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_empty_ocr_is_error_payload() {
        let analyzer = analyzer(
            FakeJudge::answering(paypal_judgment()),
            "",
            FakeSearch::default(),
        );
        let sandbox = Sandbox::create().unwrap();
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let result = analyzer
            .analyze_rendered(&ctx, &envelope("paypal.com"), &sandbox)
            .await;

        assert!(result.error.is_some());
        assert_eq!(result.impacts().total(), 0);
    }

    #[tokio::test]
    async fn test_rendered_path_sends_screenshot() {
        let judge = Arc::new(FakeJudge::answering(paypal_judgment()));
        let analyzer = ContentAnalyzer::new(
            judge.clone(),
            Arc::new(FakeRenderer),
            Arc::new(FakeOcr("Dear customer, call 020 7946 0958".to_string())),
            Arc::new(FakeSearch::default()),
            Arc::new(StaticCorpus::new()),
            settings(),
        );
        let sandbox = Sandbox::create().unwrap();
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let result = analyzer
            .analyze_rendered(&ctx, &envelope("paypal.com"), &sandbox)
            .await;

        assert!(result.error.is_none());
        // one number found, none validated
        assert_eq!(result.contact_method_analysis.phone_numbers.len(), 1);
        assert_eq!(result.contact_method_analysis.score_impact, 0);
        let seen = judge.seen.lock().unwrap();
        assert_eq!(seen[0].images.len(), 1);
        assert!(seen[0].prompt.contains("screenshot"));
    }

    #[tokio::test]
    async fn test_judge_failure_is_error_payload() {
        let judge = FakeJudge {
            judgment: None,
            seen: Mutex::new(Vec::new()),
        };
        let analyzer = analyzer(judge, "text", FakeSearch::default());
        let ctx = RequestContext::new("t", Duration::from_secs(30));
        let result = analyzer.analyze_text(&ctx, &envelope("paypal.com")).await;
        assert_eq!(result.error.as_deref(), Some("Failed to analyse email content."));
    }
}
