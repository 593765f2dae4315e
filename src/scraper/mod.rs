pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod pipeline;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scraper::normalize::NormalizedUrl;

/// Errors that terminate the pipeline for a single site.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The raw website string has no resolvable host component.
    #[error("invalid URL '{0}': no host component")]
    InvalidUrl(String),

    /// A homepage fetch failed (timeout, connection error or non-2xx status).
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
}

/// Terminal status of a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Success,
    NoContactsFound,
    Error,
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStatus::Success => write!(f, "success"),
            ScrapeStatus::NoContactsFound => write!(f, "no_contacts_found"),
            ScrapeStatus::Error => write!(f, "error"),
        }
    }
}

/// LinkedIn URLs split into company pages and personal profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedinUrls {
    pub company: BTreeSet<String>,
    pub personal: BTreeSet<String>,
}

impl LinkedinUrls {
    pub fn is_empty(&self) -> bool {
        self.company.is_empty() && self.personal.is_empty()
    }

    /// Union with another set of LinkedIn URLs.
    pub fn merge(&mut self, other: LinkedinUrls) {
        self.company.extend(other.company);
        self.personal.extend(other.personal);
    }
}

/// Contact data for one website. Immutable once returned by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub website: NormalizedUrl,
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub linkedin_urls: LinkedinUrls,
    pub status: ScrapeStatus,
}

impl ContactRecord {
    /// An empty record with the given status.
    pub fn empty(website: NormalizedUrl, status: ScrapeStatus) -> Self {
        Self {
            website,
            emails: BTreeSet::new(),
            phones: BTreeSet::new(),
            linkedin_urls: LinkedinUrls::default(),
            status,
        }
    }
}
