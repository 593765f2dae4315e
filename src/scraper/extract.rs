use std::collections::BTreeSet;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::scraper::normalize::NormalizedUrl;
use crate::scraper::LinkedinUrls;

/// Pattern-based extraction of contact data from fetched HTML.
///
/// All functions are pure: no I/O, no state beyond the compiled patterns.
pub struct Extractor {
    email: Regex,
    phone: Regex,
    linkedin_company: Regex,
    linkedin_personal: Regex,
    anchor: Selector,
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
            // Permissive on purpose: a digit run of 7+ with separators and an
            // optional leading +. Over-matching is filtered downstream by AI
            // validation.
            phone: Regex::new(r"\+?\d[\d\s().-]{6,}\d").unwrap(),
            linkedin_company: Regex::new(r"https?://(?:www\.)?linkedin\.com/company/[a-zA-Z0-9_-]+")
                .unwrap(),
            linkedin_personal: Regex::new(r"https?://(?:www\.)?linkedin\.com/in/[a-zA-Z0-9_-]+")
                .unwrap(),
            anchor: Selector::parse("a[href]").unwrap(),
        }
    }

    /// Extract email addresses from raw HTML. Matching over markup rather
    /// than visible text may over-match inside attributes; accepted tradeoff
    /// for recall.
    pub fn emails(&self, html: &str) -> BTreeSet<String> {
        self.email
            .find_iter(html)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// Extract phone number candidates from visible text only, with the
    /// original formatting preserved.
    pub fn phones(&self, html: &str) -> BTreeSet<String> {
        let text = visible_text(html);
        self.phone
            .find_iter(&text)
            .map(|m| m.as_str().trim().to_string())
            .collect()
    }

    /// Extract LinkedIn URLs, split into company pages and personal
    /// profiles. Scans both anchor hrefs and the raw page text so URLs
    /// displayed as plain text are picked up too.
    pub fn linkedin_urls(&self, html: &str) -> LinkedinUrls {
        let mut urls = LinkedinUrls::default();

        let document = Html::parse_document(html);
        for anchor in document.select(&self.anchor) {
            if let Some(href) = anchor.value().attr("href") {
                if let Some(m) = self.linkedin_company.find(href) {
                    urls.company.insert(m.as_str().trim_end_matches('/').to_string());
                } else if let Some(m) = self.linkedin_personal.find(href) {
                    urls.personal.insert(m.as_str().trim_end_matches('/').to_string());
                }
            }
        }

        for m in self.linkedin_company.find_iter(html) {
            urls.company.insert(m.as_str().trim_end_matches('/').to_string());
        }
        for m in self.linkedin_personal.find_iter(html) {
            urls.personal.insert(m.as_str().trim_end_matches('/').to_string());
        }

        urls
    }

    /// Extract internal links: anchors whose resolved absolute URL contains
    /// the page's own host, deduplicated, in document order.
    pub fn internal_links(&self, html: &str, base: &NormalizedUrl) -> Vec<String> {
        let base_url = match Url::parse(base.as_str()) {
            Ok(url) => url,
            Err(_) => return Vec::new(),
        };
        let host = match base_url.host_str() {
            Some(host) => host.to_string(),
            None => return Vec::new(),
        };

        let document = Html::parse_document(html);
        let mut seen = BTreeSet::new();
        let mut links = Vec::new();

        for anchor in document.select(&self.anchor) {
            let href = match anchor.value().attr("href") {
                Some(href) => href,
                None => continue,
            };
            let resolved = match base_url.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            };
            if resolved.contains(&host) && seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }

        links
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten HTML into its visible text, tags stripped.
fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}
