//! HTML source extractor.
//!
//! Regex-driven: the facility's source descriptor carries a
//! `row_pattern` that matches one listing per match, and any number of
//! `field:<name>` patterns (first capture group wins) applied within
//! the row. The patterns are injected configuration — this file only
//! knows how to fetch, split, and capture.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::traits::extractor::SourceExtractor;
use crate::types::capture::{Extraction, ExtractionMethod, RawFragment};
use crate::types::facility::{Facility, SourceDescriptor};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "tailsync/0.1 (+shelter listing aggregator)";

pub struct HtmlExtractor {
    client: reqwest::Client,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Per-call timeout; a slow municipal server converts to
    /// `ExtractError::Fetch`, never a hung pipeline.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client with static config");
        Self { client }
    }

    async fn fetch(&self, url: &str) -> ExtractResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(ExtractError::fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| ExtractError::fetch(url, e))
    }
}

/// Compile the field patterns out of the descriptor options.
fn field_patterns(source: &SourceDescriptor) -> ExtractResult<Vec<(String, Regex)>> {
    let mut patterns = Vec::new();
    for (key, value) in &source.options {
        if let Some(field) = key.strip_prefix("field:") {
            let re = Regex::new(value).map_err(|e| {
                ExtractError::parse(&source.location, format!("bad field pattern {key}: {e}"))
            })?;
            patterns.push((field.to_string(), re));
        }
    }
    patterns.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(patterns)
}

/// Split a page into listing fragments using the configured patterns.
/// Exposed for tests; the trait impl wraps it with the fetch.
pub fn parse_page(
    source: &SourceDescriptor,
    body: &str,
) -> ExtractResult<Vec<RawFragment>> {
    let row_pattern = source.options.get("row_pattern").ok_or_else(|| {
        ExtractError::parse(&source.location, "missing row_pattern option")
    })?;
    let row_re = Regex::new(row_pattern).map_err(|e| {
        ExtractError::parse(&source.location, format!("bad row_pattern: {e}"))
    })?;
    let fields = field_patterns(source)?;

    let mut fragments = Vec::new();
    for (index, row) in row_re.find_iter(body).enumerate() {
        let row_text = row.as_str();
        let mut fragment = RawFragment::new(index, ExtractionMethod::Dom, &source.location);
        for (name, re) in &fields {
            if let Some(caps) = re.captures(row_text) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    fragment
                        .fields
                        .insert(name.clone(), strip_tags(m.as_str()));
                }
            }
        }
        if fragment.fields.is_empty() {
            fragment
                .fields
                .insert("text".to_string(), strip_tags(row_text));
        }
        fragments.push(fragment);
    }

    if fragments.is_empty() {
        return Err(ExtractError::parse(
            &source.location,
            "row_pattern matched nothing",
        ));
    }

    Ok(fragments)
}

fn strip_tags(html: &str) -> String {
    // Good enough for field cells; full HTML sanitizing is not this
    // extractor's job.
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[async_trait]
impl SourceExtractor for HtmlExtractor {
    async fn extract(
        &self,
        facility: &Facility,
        source: &SourceDescriptor,
    ) -> ExtractResult<Extraction> {
        let body = self.fetch(&source.location).await?;
        debug!(
            facility = %facility.id,
            url = %source.location,
            bytes = body.len(),
            "page fetched"
        );

        let fragments = match parse_page(source, &body) {
            Ok(fragments) => fragments,
            Err(e) => return Err(e.with_content(body.into_bytes())),
        };
        Ok(Extraction {
            fragments,
            raw_content: body.into_bytes(),
            method: ExtractionMethod::Dom,
        })
    }

    fn name(&self) -> &str {
        "html"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::facility::SourceFormat;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("https://example.jp/cats.html", SourceFormat::Html)
            .with_option("row_pattern", r"(?s)<tr class=.animal.>.*?</tr>")
            .with_option("field:name", r"<td class=.name.>(.*?)</td>")
            .with_option("field:deadline", r"<td class=.deadline.>(.*?)</td>")
    }

    const PAGE: &str = r#"
        <table>
        <tr class="animal"><td class="name">Mike</td><td class="deadline">2025/07/01</td></tr>
        <tr class="animal"><td class="name"><b>Kuro</b></td><td class="deadline">2025/07/03</td></tr>
        </table>
    "#;

    #[test]
    fn rows_split_and_fields_capture() {
        let fragments = parse_page(&source(), PAGE).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].field("name"), Some("Mike"));
        assert_eq!(fragments[0].field("deadline"), Some("2025/07/01"));
        // Markup inside a cell is stripped.
        assert_eq!(fragments[1].field("name"), Some("Kuro"));
        assert_eq!(fragments[1].index, 1);
    }

    #[test]
    fn no_rows_is_a_parse_error() {
        let err = parse_page(&source(), "<html><body>renewal notice</body></html>").unwrap_err();
        assert!(matches!(err, ExtractError::Parse { .. }));
    }

    #[test]
    fn missing_row_pattern_is_a_parse_error() {
        let bare = SourceDescriptor::new("https://example.jp/x", SourceFormat::Html);
        assert!(matches!(
            parse_page(&bare, PAGE).unwrap_err(),
            ExtractError::Parse { .. }
        ));
    }
}
