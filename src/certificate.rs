use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything a renderer needs to produce the certificate document.
#[derive(Debug, Clone)]
pub struct CertificateDocument {
    pub code: String,
    pub user_id: String,
    pub course_title: String,
    pub issued_at: DateTime<Utc>,
}

/// Subdirectory of `DATA_DIR` holding rendered documents. Only this directory
/// is served over HTTP.
pub const CERTIFICATES_DIR: &str = "certificates";

/// Produces the certificate document and returns the URL it is served from.
///
/// Called before the certificate record is written. If rendering fails no
/// record exists; if the record write loses a race the document is left
/// behind unreferenced.
#[async_trait::async_trait]
pub trait CertificateRenderer: Send + Sync {
    async fn render(&self, doc: &CertificateDocument) -> anyhow::Result<String>;
}

/// Writes an HTML certificate to `<data_dir>/certificates/<code>.html`.
#[derive(Debug, Clone)]
pub struct FileCertificateRenderer {
    data_dir: PathBuf,
    public_prefix: String,
}

impl FileCertificateRenderer {
    pub fn new(data_dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            public_prefix: public_prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl CertificateRenderer for FileCertificateRenderer {
    async fn render(&self, doc: &CertificateDocument) -> anyhow::Result<String> {
        let dir = self.data_dir.join(CERTIFICATES_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.html", doc.code);
        tokio::fs::write(dir.join(&file_name), render_html(doc)).await?;

        Ok(format!(
            "{}/{}/{}",
            self.public_prefix.trim_end_matches('/'),
            CERTIFICATES_DIR,
            file_name
        ))
    }
}

pub fn generate_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CERT-{}-{}", &raw[..4], &raw[4..12])
}

fn render_html(doc: &CertificateDocument) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Certificate {code}</title>
  <style>
    body{{font-family:serif;text-align:center;padding:64px}}
    .code{{font-family:monospace;color:#666}}
  </style>
</head>
<body>
<h1>Certificate of Completion</h1>
<p>This certifies that</p>
<h2>{user}</h2>
<p>has completed the course</p>
<h2>{course}</h2>
<p>Issued {issued}</p>
<p class='code'>{code}</p>
</body>
</html>"#,
        code = escape(&doc.code),
        user = escape(&doc.user_id),
        course = escape(&doc.course_title),
        issued = doc.issued_at.format("%Y-%m-%d"),
    )
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_well_formed() {
        let a = generate_code();
        let b = generate_code();
        assert_ne!(a, b);
        assert!(a.starts_with("CERT-"));
        assert_eq!(a.len(), "CERT-".len() + 4 + 1 + 8);
    }

    #[test]
    fn html_escapes_learner_text() {
        let doc = CertificateDocument {
            code: "CERT-AAAA-BBBBBBBB".into(),
            user_id: "<script>".into(),
            course_title: "Rust & Friends".into(),
            issued_at: Utc::now(),
        };
        let html = render_html(&doc);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Rust &amp; Friends"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn file_renderer_writes_document_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FileCertificateRenderer::new(dir.path(), "/content/");
        let doc = CertificateDocument {
            code: "CERT-1234-ABCDEF01".into(),
            user_id: "learner-1".into(),
            course_title: "Ownership".into(),
            issued_at: Utc::now(),
        };

        let url = renderer.render(&doc).await.unwrap();

        assert_eq!(url, "/content/certificates/CERT-1234-ABCDEF01.html");
        let written = std::fs::read_to_string(
            dir.path().join("certificates").join("CERT-1234-ABCDEF01.html"),
        )
        .unwrap();
        assert!(written.contains("Ownership"));
        assert!(written.contains("learner-1"));
    }
}
