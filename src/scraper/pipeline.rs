use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ai::{Assistant, Validated, MAX_CANDIDATE_LINKS};
use crate::scraper::extract::Extractor;
use crate::scraper::fetch::Fetcher;
use crate::scraper::normalize::{normalize_url, NormalizedUrl};
use crate::scraper::{ContactRecord, LinkedinUrls, ScrapeError, ScrapeStatus};
use crate::storage::cache::{ContactCache, CONTACT_NS, LINKEDIN_NS};

/// Caller flags for one scrape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeOptions {
    /// Skip AI contact-page detection for faster results.
    pub skip_contact_page: bool,
    /// Also ask the AI to judge LinkedIn URLs during validation.
    pub validate_linkedin: bool,
}

/// Per-site scraping pipeline.
///
/// Stage order: normalize, cache lookup, homepage fetch, extraction,
/// optional contact-page discovery and second fetch, empty check, optional
/// AI validation, cache write. Homepage failures are terminal for the site;
/// contact-page and AI failures degrade without aborting.
pub struct ScrapePipeline {
    fetcher: Fetcher,
    extractor: Extractor,
    cache: Arc<dyn ContactCache>,
    assistant: Arc<dyn Assistant>,
    cache_ttl: u64,
}

/// Everything extracted from the pages of one site, pre-validation.
#[derive(Debug, Default)]
struct RawContacts {
    emails: std::collections::BTreeSet<String>,
    phones: std::collections::BTreeSet<String>,
    linkedin_urls: LinkedinUrls,
}

impl RawContacts {
    fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty() && self.linkedin_urls.is_empty()
    }
}

impl ScrapePipeline {
    pub fn new(
        fetcher: Fetcher,
        cache: Arc<dyn ContactCache>,
        assistant: Arc<dyn Assistant>,
        cache_ttl: u64,
    ) -> Self {
        Self {
            fetcher,
            extractor: Extractor::new(),
            cache,
            assistant,
            cache_ttl,
        }
    }

    /// Scrape one website for emails, phones and LinkedIn URLs.
    pub async fn scrape(
        &self,
        raw_website: &str,
        options: &ScrapeOptions,
    ) -> Result<ContactRecord, ScrapeError> {
        let website = normalize_url(raw_website)?;

        if let Some(cached) = self.cache_lookup(CONTACT_NS, &website).await {
            info!("Cache hit for {}", website);
            return Ok(cached);
        }

        info!("Fetching homepage: {}", website);
        let html = self.fetcher.fetch(website.as_str()).await?;

        let mut contacts = RawContacts {
            emails: self.extractor.emails(&html),
            phones: self.extractor.phones(&html),
            linkedin_urls: self.extractor.linkedin_urls(&html),
        };
        let links = self.extractor.internal_links(&html, &website);
        debug!(
            "Homepage of {}: {} email(s), {} phone(s), {} LinkedIn URL(s), {} internal link(s)",
            website,
            contacts.emails.len(),
            contacts.phones.len(),
            contacts.linkedin_urls.company.len() + contacts.linkedin_urls.personal.len(),
            links.len()
        );

        if options.skip_contact_page {
            debug!("Skipping contact page detection for {}", website);
        } else if let Some(contact_page) = self.discover_contact_page(&website, &links).await {
            self.merge_contact_page(&contact_page, &mut contacts).await;
        }

        if contacts.is_empty() {
            info!("No contacts found for {}", website);
            let record = ContactRecord::empty(website, ScrapeStatus::NoContactsFound);
            // Cached so the same empty site is not rescraped within the TTL.
            self.cache_store(CONTACT_NS, &record).await;
            return Ok(record);
        }

        let validated = self.validate(&contacts, options.validate_linkedin).await;
        let record = ContactRecord {
            website,
            emails: validated.emails,
            phones: validated.phones,
            linkedin_urls: validated.linkedin_urls,
            status: ScrapeStatus::Success,
        };

        self.cache_store(CONTACT_NS, &record).await;
        Ok(record)
    }

    /// Fast variant: homepage only, LinkedIn patterns only, no AI calls,
    /// separate cache namespace.
    pub async fn scrape_linkedin_only(
        &self,
        raw_website: &str,
    ) -> Result<ContactRecord, ScrapeError> {
        let website = normalize_url(raw_website)?;

        if let Some(cached) = self.cache_lookup(LINKEDIN_NS, &website).await {
            info!("LinkedIn cache hit for {}", website);
            return Ok(cached);
        }

        info!("Fetching homepage for LinkedIn discovery: {}", website);
        let html = self.fetcher.fetch(website.as_str()).await?;
        let linkedin_urls = self.extractor.linkedin_urls(&html);

        let status = if linkedin_urls.is_empty() {
            ScrapeStatus::NoContactsFound
        } else {
            ScrapeStatus::Success
        };

        let record = ContactRecord {
            website,
            emails: Default::default(),
            phones: Default::default(),
            linkedin_urls,
            status,
        };
        self.cache_store(LINKEDIN_NS, &record).await;
        Ok(record)
    }

    /// Ask the AI for a contact page. Failures, malformed answers and
    /// answers equal to the homepage all collapse to `None`.
    async fn discover_contact_page(
        &self,
        website: &NormalizedUrl,
        links: &[String],
    ) -> Option<String> {
        // The cap is part of the Assistant contract; enforce it here so no
        // implementation ever sees an unbounded link list.
        let candidates = &links[..links.len().min(MAX_CANDIDATE_LINKS)];
        debug!(
            "Sending {} of {} link(s) to AI to find a contact page for {}",
            candidates.len(),
            links.len(),
            website
        );
        match self
            .assistant
            .guess_contact_page(website.as_str(), candidates)
            .await
        {
            Ok(Some(candidate)) => {
                if candidate.trim_end_matches('/') == website.as_str() {
                    debug!("Contact page candidate is the homepage itself");
                    None
                } else {
                    info!("Contact page found: {}", candidate);
                    Some(candidate)
                }
            }
            Ok(None) => {
                debug!("No dedicated contact page found for {}", website);
                None
            }
            Err(e) => {
                warn!("Contact page discovery failed for {}: {}", website, e);
                None
            }
        }
    }

    /// Fetch the contact page and union its contacts with the homepage
    /// results. A failed fetch keeps homepage-only results.
    async fn merge_contact_page(&self, contact_page: &str, contacts: &mut RawContacts) {
        let html = match self.fetcher.fetch(contact_page).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Contact page fetch failed, keeping homepage results: {}", e);
                return;
            }
        };

        contacts.emails.extend(self.extractor.emails(&html));
        contacts.phones.extend(self.extractor.phones(&html));
        contacts
            .linkedin_urls
            .merge(self.extractor.linkedin_urls(&html));
        debug!(
            "After contact page: {} email(s), {} phone(s)",
            contacts.emails.len(),
            contacts.phones.len()
        );
    }

    /// AI validation. When the call fails the validated email/phone sets are
    /// empty (cannot confirm validity) but LinkedIn URLs pass through.
    async fn validate(&self, contacts: &RawContacts, validate_linkedin: bool) -> Validated {
        match self
            .assistant
            .validate_contacts(
                &contacts.emails,
                &contacts.phones,
                &contacts.linkedin_urls,
                validate_linkedin,
            )
            .await
        {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Contact validation failed, dropping unverified emails/phones: {}", e);
                Validated {
                    emails: Default::default(),
                    phones: Default::default(),
                    linkedin_urls: contacts.linkedin_urls.clone(),
                }
            }
        }
    }

    async fn cache_lookup(&self, namespace: &str, website: &NormalizedUrl) -> Option<ContactRecord> {
        match self.cache.get(namespace, website.as_str()).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read failed for {}: {}", website, e);
                None
            }
        }
    }

    async fn cache_store(&self, namespace: &str, record: &ContactRecord) {
        if let Err(e) = self
            .cache
            .set(namespace, record.website.as_str(), record, self.cache_ttl)
            .await
        {
            warn!("Cache write failed for {}: {}", record.website, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, MockAssistant};
    use crate::cli::config::ScraperSettings;
    use crate::storage::cache::MemoryCache;
    use std::collections::BTreeSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline_with(
        assistant: MockAssistant,
        cache: Arc<MemoryCache>,
    ) -> ScrapePipeline {
        let fetcher = Fetcher::new(&ScraperSettings {
            fetch_timeout_secs: 2,
            user_agent: "Mozilla/5.0".to_string(),
        })
        .unwrap();
        ScrapePipeline::new(fetcher, cache, Arc::new(assistant), 3600)
    }

    fn passthrough_validation(assistant: &mut MockAssistant) {
        assistant.expect_validate_contacts().returning(
            |emails, phones, linkedin, _validate| {
                Ok(Validated {
                    emails: emails.clone(),
                    phones: phones.clone(),
                    linkedin_urls: linkedin.clone(),
                })
            },
        );
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_fetching() {
        // No HTTP server is running; an attempted fetch would fail loudly
        // with a different error variant.
        let pipeline = pipeline_with(MockAssistant::new(), Arc::new(MemoryCache::new()));
        let err = pipeline
            .scrape("bad url ##", &ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_all_network_calls() {
        let cache = Arc::new(MemoryCache::new());
        let mut seeded = ContactRecord::empty(
            normalize_url("example.com").unwrap(),
            ScrapeStatus::Success,
        );
        seeded.emails.insert("cached@example.com".to_string());
        cache
            .set(CONTACT_NS, "http://example.com", &seeded, 3600)
            .await
            .unwrap();

        // A mock with no expectations panics on any AI call; example.com is
        // not served anywhere, so a fetch attempt would error out.
        let pipeline = pipeline_with(MockAssistant::new(), cache);
        let record = pipeline
            .scrape("https://www.example.com/", &ScrapeOptions::default())
            .await
            .unwrap();
        assert_eq!(record, seeded);
    }

    #[tokio::test]
    async fn test_contact_page_results_union_with_homepage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="/contact">contact</a> <p>a@x.com</p>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contact"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>b@x.com</p>"))
            .mount(&server)
            .await;

        let contact_url = format!("{}/contact", server.uri());
        let mut assistant = MockAssistant::new();
        let guessed = contact_url.clone();
        assistant
            .expect_guess_contact_page()
            .returning(move |_, _| Ok(Some(guessed.clone())));
        passthrough_validation(&mut assistant);

        let pipeline = pipeline_with(assistant, Arc::new(MemoryCache::new()));
        let record = pipeline
            .scrape(&server.uri(), &ScrapeOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, ScrapeStatus::Success);
        assert_eq!(
            record.emails,
            BTreeSet::from(["a@x.com".to_string(), "b@x.com".to_string()])
        );
    }

    #[tokio::test]
    async fn test_contact_page_candidates_are_capped() {
        let many_links: String = (0..30)
            .map(|i| format!(r#"<a href="/page-{}">p{}</a>"#, i, i))
            .collect();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(many_links))
            .mount(&server)
            .await;

        let mut assistant = MockAssistant::new();
        assistant
            .expect_guess_contact_page()
            .withf(|_, links| links.len() == MAX_CANDIDATE_LINKS)
            .returning(|_, _| Ok(None));

        let pipeline = pipeline_with(assistant, Arc::new(MemoryCache::new()));
        let record = pipeline
            .scrape(&server.uri(), &ScrapeOptions::default())
            .await
            .unwrap();
        // Thirty links, no contacts: the capped call above is the only one.
        assert_eq!(record.status, ScrapeStatus::NoContactsFound);
    }

    #[tokio::test]
    async fn test_contact_page_fetch_failure_keeps_homepage_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>a@x.com</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contact"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let contact_url = format!("{}/contact", server.uri());
        let mut assistant = MockAssistant::new();
        assistant
            .expect_guess_contact_page()
            .returning(move |_, _| Ok(Some(contact_url.clone())));
        passthrough_validation(&mut assistant);

        let pipeline = pipeline_with(assistant, Arc::new(MemoryCache::new()));
        let record = pipeline
            .scrape(&server.uri(), &ScrapeOptions::default())
            .await
            .unwrap();

        assert_eq!(record.emails, BTreeSet::from(["a@x.com".to_string()]));
    }

    #[tokio::test]
    async fn test_validation_failure_drops_emails_but_keeps_linkedin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<p>a@x.com</p> <a href="https://linkedin.com/company/acme">li</a>"#,
            ))
            .mount(&server)
            .await;

        let mut assistant = MockAssistant::new();
        assistant
            .expect_guess_contact_page()
            .returning(|_, _| Err(AiError::Http("offline".to_string())));
        assistant
            .expect_validate_contacts()
            .returning(|_, _, _, _| Err(AiError::Http("offline".to_string())));

        let pipeline = pipeline_with(assistant, Arc::new(MemoryCache::new()));
        let record = pipeline
            .scrape(&server.uri(), &ScrapeOptions::default())
            .await
            .unwrap();

        // Fail-closed for emails and phones, pass-through for LinkedIn.
        assert_eq!(record.status, ScrapeStatus::Success);
        assert!(record.emails.is_empty());
        assert!(record.phones.is_empty());
        assert!(record
            .linkedin_urls
            .company
            .contains("https://linkedin.com/company/acme"));
    }

    #[tokio::test]
    async fn test_empty_site_is_cached_and_not_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>nothing here</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let options = ScrapeOptions {
            skip_contact_page: true,
            ..Default::default()
        };
        let pipeline = pipeline_with(MockAssistant::new(), Arc::new(MemoryCache::new()));

        let first = pipeline.scrape(&server.uri(), &options).await.unwrap();
        assert_eq!(first.status, ScrapeStatus::NoContactsFound);

        // Served from cache; the expect(1) above verifies no second fetch.
        let second = pipeline.scrape(&server.uri(), &options).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_homepage_fetch_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let pipeline = pipeline_with(MockAssistant::new(), Arc::new(MemoryCache::new()));
        let err = pipeline
            .scrape(&server.uri(), &ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_linkedin_only_uses_distinct_namespace_and_no_ai() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="https://linkedin.com/in/jane">Jane</a> <p>a@x.com</p>"#,
            ))
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::new());
        // No AI expectations: any assistant call would panic the test.
        let pipeline = pipeline_with(MockAssistant::new(), cache.clone());

        let record = pipeline.scrape_linkedin_only(&server.uri()).await.unwrap();
        assert_eq!(record.status, ScrapeStatus::Success);
        assert!(record.linkedin_urls.personal.contains("https://linkedin.com/in/jane"));
        // Emails are not part of the fast variant.
        assert!(record.emails.is_empty());

        let key = record.website.as_str();
        assert!(cache.get(LINKEDIN_NS, key).await.unwrap().is_some());
        assert!(cache.get(CONTACT_NS, key).await.unwrap().is_none());
    }
}
