use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::AiSettings;
use crate::scraper::LinkedinUrls;

/// Errors from the AI assistant. The pipeline treats every variant as
/// "no answer" and degrades; none of them are fatal.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("no API key configured (expected in ${0})")]
    MissingApiKey(String),

    #[error("AI request failed: {0}")]
    Http(String),

    #[error("AI returned malformed output: {0}")]
    Malformed(String),
}

/// Validated contact sets returned by the assistant.
#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub linkedin_urls: LinkedinUrls,
}

/// Black-box AI capabilities consumed by the scrape pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Guess the most likely contact page from a set of internal links.
    /// Returns `None` when no plausible contact page exists.
    async fn guess_contact_page(
        &self,
        base_url: &str,
        links: &[String],
    ) -> Result<Option<String>, AiError>;

    /// Clean and deduplicate extracted contact sets. LinkedIn URLs are only
    /// judged when `validate_linkedin` is set; otherwise they are passed
    /// through unchanged.
    async fn validate_contacts(
        &self,
        emails: &BTreeSet<String>,
        phones: &BTreeSet<String>,
        linkedin_urls: &LinkedinUrls,
        validate_linkedin: bool,
    ) -> Result<Validated, AiError>;
}

/// At most this many internal links are offered to the model, to save tokens.
pub const MAX_CANDIDATE_LINKS: usize = 20;

/// Assistant backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiAssistant {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl OpenAiAssistant {
    pub fn from_settings(settings: &AiSettings) -> Result<Self, AiError> {
        let api_key = std::env::var(&settings.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "No API key in {}; AI-assisted stages will be skipped",
                settings.api_key_env
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AiError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            api_key_env: settings.api_key_env.clone(),
        })
    }

    /// Send one user prompt and return the raw completion text.
    async fn complete(&self, prompt: String) -> Result<String, AiError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AiError::MissingApiKey(self.api_key_env.clone()))?;

        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| AiError::Http(e.to_string()))?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AiError::Malformed("completion had no choices".to_string()))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ContactPageAnswer {
    most_likely_contact_page: Option<String>,
}

#[derive(Deserialize)]
struct ValidationAnswer {
    #[serde(default)]
    valid_email: BTreeSet<String>,
    #[serde(default)]
    valid_phones: BTreeSet<String>,
    #[serde(default)]
    valid_linkedin_urls: Option<LinkedinUrls>,
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    async fn guess_contact_page(
        &self,
        base_url: &str,
        links: &[String],
    ) -> Result<Option<String>, AiError> {
        let limited: Vec<&String> = links.iter().take(MAX_CANDIDATE_LINKS).collect();

        let prompt = format!(
            "Given the following list of internal website links and the base URL, \
             identify the most likely contact page URL.\n\
             Base URL: {}\n\
             Internal Links: {}\n\
             Return ONLY a JSON response in this exact format with no additional text: \
             {{\"most_likely_contact_page\": \"URL_HERE\"}}\n\
             The contact page could be named: contact, contact-us, contactez-nous, \
             contattaci, kontakt, contato, contacto, about, reach-us, get-in-touch, etc.\n\
             If no contact page is found, return null.",
            base_url,
            serde_json::to_string(&limited).unwrap_or_default(),
        );

        let content = self.complete(prompt).await?;
        let answer: ContactPageAnswer = serde_json::from_str(content.trim())
            .map_err(|e| AiError::Malformed(format!("{}: {}", e, content)))?;

        let candidate = match answer.most_likely_contact_page {
            Some(candidate) if !candidate.eq_ignore_ascii_case("null") => candidate,
            _ => return Ok(None),
        };

        // The model sometimes answers with a relative path.
        let absolute = Url::parse(base_url)
            .and_then(|base| base.join(&candidate))
            .map_err(|e| AiError::Malformed(format!("unusable contact page URL: {}", e)))?;

        debug!("Contact page candidate: {}", absolute);
        Ok(Some(absolute.to_string()))
    }

    async fn validate_contacts(
        &self,
        emails: &BTreeSet<String>,
        phones: &BTreeSet<String>,
        linkedin_urls: &LinkedinUrls,
        validate_linkedin: bool,
    ) -> Result<Validated, AiError> {
        let emails_json = serde_json::to_string(emails).unwrap_or_default();
        let phones_json = serde_json::to_string(phones).unwrap_or_default();

        let prompt = if validate_linkedin {
            format!(
                "Validate the following extracted contact information.\n\
                 Return ONLY valid contact information in JSON format.\n\
                 Emails: {}\nPhones: {}\nLinkedIn URLs: {}\n\
                 Return ONLY this JSON structure with no additional text:\n\
                 {{\"valid_email\": [], \"valid_phones\": [], \
                 \"valid_linkedin_urls\": {{\"company\": [], \"personal\": []}}}}\n\
                 For phone numbers: include numbers that look like real phone numbers \
                 (7-15 digits), preserve formatting including \"+\" if present.\n\
                 For LinkedIn URLs: only include valid URLs and keep company pages \
                 separate from personal profiles.",
                emails_json,
                phones_json,
                serde_json::to_string(linkedin_urls).unwrap_or_default(),
            )
        } else {
            format!(
                "Validate the following extracted emails and phone numbers.\n\
                 Return ONLY valid contact information in JSON format.\n\
                 Emails: {}\nPhones: {}\n\
                 Return ONLY this JSON structure with no additional text:\n\
                 {{\"valid_email\": [], \"valid_phones\": []}}\n\
                 For phone numbers: include numbers that look like real phone numbers \
                 (7-15 digits), preserve formatting including \"+\" if present.",
                emails_json, phones_json,
            )
        };

        let content = self.complete(prompt).await?;
        let answer: ValidationAnswer = serde_json::from_str(content.trim())
            .map_err(|e| AiError::Malformed(format!("{}: {}", e, content)))?;

        let linkedin_urls = if validate_linkedin {
            answer.valid_linkedin_urls.unwrap_or_default()
        } else {
            // LinkedIn validation was not requested; pass the sets through.
            linkedin_urls.clone()
        };

        Ok(Validated {
            emails: answer.valid_email,
            phones: answer.valid_phones,
            linkedin_urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> AiSettings {
        AiSettings {
            base_url: server.uri(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "CONTACT_HARVESTER_TEST_KEY".to_string(),
            timeout_secs: 5,
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[tokio::test]
    async fn test_guess_contact_page_resolves_relative_urls() {
        std::env::set_var("CONTACT_HARVESTER_TEST_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"most_likely_contact_page": "/contact-us"}"#,
            )))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::from_settings(&settings_for(&server)).unwrap();
        let guess = assistant
            .guess_contact_page("http://example.com", &["http://example.com/contact-us".into()])
            .await
            .unwrap();
        assert_eq!(guess.as_deref(), Some("http://example.com/contact-us"));
    }

    #[tokio::test]
    async fn test_guess_contact_page_handles_null() {
        std::env::set_var("CONTACT_HARVESTER_TEST_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"most_likely_contact_page": null}"#,
            )))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::from_settings(&settings_for(&server)).unwrap();
        let guess = assistant
            .guess_contact_page("http://example.com", &[])
            .await
            .unwrap();
        assert_eq!(guess, None);
    }

    #[tokio::test]
    async fn test_malformed_completion_is_an_error_not_a_panic() {
        std::env::set_var("CONTACT_HARVESTER_TEST_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("sorry, I cannot do that")),
            )
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::from_settings(&settings_for(&server)).unwrap();
        let err = assistant
            .guess_contact_page("http://example.com", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_validation_passes_linkedin_through_when_not_requested() {
        std::env::set_var("CONTACT_HARVESTER_TEST_KEY", "test-key");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"valid_email": ["info@example.com"], "valid_phones": []}"#,
            )))
            .mount(&server)
            .await;

        let mut linkedin = LinkedinUrls::default();
        linkedin
            .company
            .insert("https://linkedin.com/company/acme".to_string());

        let assistant = OpenAiAssistant::from_settings(&settings_for(&server)).unwrap();
        let validated = assistant
            .validate_contacts(
                &BTreeSet::from(["info@example.com".to_string()]),
                &BTreeSet::new(),
                &linkedin,
                false,
            )
            .await
            .unwrap();

        assert!(validated.emails.contains("info@example.com"));
        assert_eq!(validated.linkedin_urls, linkedin);
    }
}
