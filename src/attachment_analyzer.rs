use crate::error::AnalysisError;
use crate::message::Attachment;
use crate::scoring;
use serde::Serialize;

pub const DANGEROUS_EXTENSIONS: &[&str] = &[
    ".exe", ".scr", ".bat", ".cmd", ".com", ".pif", ".vbs", ".js", ".jar", ".app", ".msi",
    ".run", ".ps1", ".hta",
];

const ARCHIVE_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
];

/// Payload of the `executableAnalysis` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableAnalysisResult {
    pub found: bool,
    pub message: String,
    pub dangerous_files: Vec<String>,
    pub score_impact: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutableAnalysisResult {
    pub fn failed(error: &AnalysisError) -> Self {
        Self {
            found: false,
            message: "Attachment analysis could not be completed.".to_string(),
            dangerous_files: Vec::new(),
            score_impact: 0,
            error: Some(error.to_string()),
        }
    }
}

pub struct AttachmentAnalyzer;

impl AttachmentAnalyzer {
    pub fn analyze(attachments: &[Attachment]) -> ExecutableAnalysisResult {
        let mut dangerous_files = Vec::new();
        for attachment in attachments {
            if Self::is_dangerous_name(&attachment.filename) {
                dangerous_files.push(attachment.filename.clone());
            }
            if Self::is_archive(attachment) {
                dangerous_files.extend(
                    Self::embedded_filenames(&attachment.data)
                        .into_iter()
                        .filter(|name| Self::is_dangerous_name(name))
                        .map(|name| format!("{}/{}", attachment.filename, name)),
                );
            }
        }

        if dangerous_files.is_empty() {
            ExecutableAnalysisResult {
                found: false,
                message: format!("{} attachment(s) checked, none executable.", attachments.len()),
                dangerous_files,
                score_impact: scoring::impact(scoring::EXECUTABLE_FILE_FOUND),
                error: None,
            }
        } else {
            log::info!("Dangerous attachments: {dangerous_files:?}");
            ExecutableAnalysisResult {
                found: true,
                message: format!("{} executable file(s) found.", dangerous_files.len()),
                dangerous_files,
                score_impact: 0,
                error: None,
            }
        }
    }

    fn is_archive(attachment: &Attachment) -> bool {
        let content_type = attachment.content_type.to_lowercase();
        let name = attachment.filename.to_lowercase();
        ARCHIVE_CONTENT_TYPES.iter().any(|t| content_type.contains(t))
            || name.ends_with(".zip")
            || name.ends_with(".rar")
    }

    /// Filename-looking strings inside archive bytes. Zip and rar both store
    /// member names uncompressed in their headers.
    fn embedded_filenames(data: &[u8]) -> Vec<String> {
        let content = String::from_utf8_lossy(data);
        let mut filenames = Vec::new();
        for ext in DANGEROUS_EXTENSIONS {
            let mut from = 0;
            while let Some(offset) = content[from..].find(ext) {
                let pos = from + offset;
                let end = pos + ext.len();
                let start = content[..pos]
                    .rfind(|c: char| c.is_whitespace() || c.is_control() || c == '/' || c == '\u{fffd}')
                    .map(|i| i + content[i..].chars().next().map_or(1, char::len_utf8))
                    .unwrap_or(0);
                let followed_by_name_char = content[end..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric());
                if start < pos && !followed_by_name_char {
                    let filename = content[start..end].trim();
                    if !filename.is_empty() && filename.len() < 100 {
                        filenames.push(filename.to_string());
                    }
                }
                from = end;
            }
        }
        filenames
    }

    pub fn is_dangerous_name(filename: &str) -> bool {
        let lower = filename.to_lowercase();
        DANGEROUS_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    }
}
