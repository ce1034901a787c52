//! Turns a raw RFC 5322 message into the envelope every analysis task reads.

use crate::domain_utils::DomainUtils;
use crate::error::{AnalysisError, AnalysisResult};
use crate::sandbox::Sandbox;
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

const CLEANED_MESSAGE_FILE: &str = "cleaned.eml";

/// Height above which a `<div>` is treated as a spacer hiding trailing content.
const SPACER_HEIGHT_PX: u32 = 3000;
const EMPTY_PARAGRAPH_RUN: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.to_lowercase().starts_with("image/")
    }
}

/// Structured view of one message.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub subject: String,
    /// From header as displayed, e.g. `PayPal <service@paypal.com>`.
    pub from: String,
    pub sender_address: String,
    /// Full sender host, e.g. `mail.paypal.com`.
    pub sub_domain: String,
    /// Registrable sender domain, e.g. `paypal.com`.
    pub domain: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
    pub raw: Vec<u8>,
    pub cleaned_path: PathBuf,
}

impl Envelope {
    pub fn images(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.is_image())
    }

    /// Writes image parts into the sandbox and maps each content id to its file.
    pub fn save_images(&self, sandbox: &Sandbox) -> AnalysisResult<HashMap<String, PathBuf>> {
        let mut saved = HashMap::new();
        let mut images = self.images().peekable();
        if images.peek().is_none() {
            return Ok(saved);
        }
        let dir = sandbox.attachments_dir()?;
        for (index, image) in images.enumerate() {
            let name = sanitize_filename(&image.filename)
                .unwrap_or_else(|| format!("image-{index}"));
            let path = dir.join(format!("{index}-{name}"));
            std::fs::write(&path, &image.data)?;
            if let Some(cid) = &image.content_id {
                saved.insert(cid.clone(), path);
            }
        }
        Ok(saved)
    }
}

fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

pub struct EnvelopeParser {
    spacer_div: Regex,
    empty_paragraphs: Regex,
    tags: Regex,
}

impl Default for EnvelopeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeParser {
    pub fn new() -> Self {
        Self {
            spacer_div: Regex::new(
                r#"(?is)<div[^>]*style\s*=\s*["'][^"']*\bheight\s*:\s*(\d+)\s*px"#,
            )
            .unwrap(),
            empty_paragraphs: Regex::new(&format!(
                r"(?is)(?:<p[^>]*>(?:\s|&nbsp;|<br\s*/?>)*</p>\s*){{{EMPTY_PARAGRAPH_RUN},}}"
            ))
            .unwrap(),
            tags: Regex::new(r"(?s)<(?:script|style)[^>]*>.*?</(?:script|style)>|<[^>]+>").unwrap(),
        }
    }

    /// Parses the raw message and writes the cleaned copy into the sandbox.
    pub fn parse(&self, raw: Vec<u8>, sandbox: &Sandbox) -> AnalysisResult<Envelope> {
        let message = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| AnalysisError::InvalidInput("message could not be parsed".into()))?;

        let subject = message.subject().unwrap_or_default().to_string();
        let sender = message.from().and_then(|from| from.first());
        let sender_address = sender
            .and_then(|addr| addr.address.as_deref())
            .unwrap_or_default()
            .to_string();
        let from = match sender.and_then(|addr| addr.name.as_deref()) {
            Some(name) if !name.is_empty() => format!("{name} <{sender_address}>"),
            _ => sender_address.clone(),
        };
        let sub_domain = DomainUtils::extract_domain(&sender_address).unwrap_or_default();
        let domain = if sub_domain.is_empty() {
            String::new()
        } else {
            DomainUtils::registrable_domain(&sub_domain)
        };

        let html = message
            .body_html(0)
            .map(|h| self.cut_html(&h))
            .unwrap_or_default();
        let text = match message.body_text(0) {
            Some(text) if !text.trim().is_empty() => text.into_owned(),
            _ => self.strip_tags(&html),
        };

        let attachments = message
            .attachments()
            .map(|part| Attachment {
                filename: part.attachment_name().unwrap_or_default().to_string(),
                content_type: part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                content_id: part
                    .content_id()
                    .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string()),
                data: part.contents().to_vec(),
            })
            .collect::<Vec<_>>();
        drop(message);

        let cleaned_path = sandbox.root().join(CLEANED_MESSAGE_FILE);
        let cleaned = format!("Subject: {subject}\r\nFrom: {from}\r\n\r\n{text}");
        std::fs::write(&cleaned_path, cleaned)?;

        log::debug!(
            "[{}] Parsed message from {sender_address}: {} attachment(s), {} bytes html",
            sandbox.id(),
            attachments.len(),
            html.len()
        );

        Ok(Envelope {
            subject,
            from,
            sender_address,
            sub_domain,
            domain,
            text,
            html,
            attachments,
            raw,
            cleaned_path,
        })
    }

    /// Truncates the HTML at the first giant spacer, whichever kind comes first.
    pub fn cut_html(&self, html: &str) -> String {
        let spacer = self
            .spacer_div
            .captures_iter(html)
            .find(|caps| {
                caps.get(1)
                    .and_then(|h| h.as_str().parse::<u32>().ok())
                    .is_some_and(|h| h > SPACER_HEIGHT_PX)
            })
            .and_then(|caps| caps.get(0))
            .map(|m| m.start());
        let paragraphs = self.empty_paragraphs.find(html).map(|m| m.start());

        match spacer.into_iter().chain(paragraphs).min() {
            Some(cut) => html[..cut].to_string(),
            None => html.to_string(),
        }
    }

    pub fn strip_tags(&self, html: &str) -> String {
        let stripped = self.tags.replace_all(html, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
