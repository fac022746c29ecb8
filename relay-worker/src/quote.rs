use std::time;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relay_common::reading::{Reading, NOT_AVAILABLE};

use crate::config::QuoteApi;
use crate::error::{QuoteError, WorkerError};
use crate::providers::SecretProvider;

/// Returned when the service answers successfully but without any text.
pub const EMPTY_RESPONSE_QUOTE: &str = "Soft air drifts; the room keeps its quiet counsel.";

/// Returned when the request itself fails.
pub const FAILED_REQUEST_QUOTE: &str = "Quiet air, steady light; the room keeps its calm.";

pub const SYSTEM_PROMPT: &str = "You are concise and poetic. Write a one- or two-line literature-style quote inspired by the indoor climate. Under 25 words. No emojis.";

pub const SAMPLING_TEMPERATURE: f64 = 0.7;

/// Produces the quote shown on the display for a reading.
#[async_trait]
pub trait QuoteGenerator: Send + Sync {
    /// Always yields a non-empty quote; failures are replaced by a fixed fallback.
    async fn generate(&self, reading: &Reading, fallback_site: &str) -> String;
}

/// The one line of context the model writes its quote from.
pub fn context_line(reading: &Reading, fallback_site: &str) -> String {
    let time = DateTime::from_timestamp_millis(reading.timestamp_millis)
        .map(|utc| utc.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| NOT_AVAILABLE.to_owned());

    format!(
        "Site={}, Time={}, Temp={}°C, Humidity={}%.",
        reading.site_or(fallback_site),
        time,
        reading.temperature_label(),
        reading.humidity_label(),
    )
}

#[derive(Debug, Serialize)]
struct RoleMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [RoleMessage<'a>; 2],
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: [RoleMessage<'a>; 2],
    temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
}

/// Asks an OpenAI-style HTTP endpoint for a quote.
pub struct HttpQuoteGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api: QuoteApi,
    api_key: Option<String>,
}

impl HttpQuoteGenerator {
    /// # Arguments
    ///
    /// * `endpoint`: The URL every quote request is POSTed to.
    /// * `model`: Model identifier sent with each request.
    /// * `api`: Which request/response shape the endpoint speaks.
    /// * `request_timeout`: Bound on a whole request, from connect to the last body byte.
    /// * `secrets`: Source of the bearer credential.
    pub fn new(
        endpoint: &str,
        model: &str,
        api: QuoteApi,
        request_timeout: time::Duration,
        secrets: &dyn SecretProvider,
    ) -> Result<Self, WorkerError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Auralink Relay")
            .timeout(request_timeout)
            .build()
            .map_err(WorkerError::HttpClient)?;

        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
            model: model.to_owned(),
            api,
            api_key: secrets.quote_api_key(),
        })
    }

    /// Send exactly one request and return whatever text came back, possibly empty.
    async fn request_quote(&self, context: &str) -> Result<String, QuoteError> {
        let user = format!("Conditions: {}\nQuote:", context);
        let messages = [
            RoleMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            RoleMessage {
                role: "user",
                content: &user,
            },
        ];

        let request = self.client.post(&self.endpoint);
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let request = match self.api {
            QuoteApi::ChatCompletions => request.json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: SAMPLING_TEMPERATURE,
            }),
            QuoteApi::Responses => request.json(&ResponsesRequest {
                model: &self.model,
                input: messages,
                temperature: SAMPLING_TEMPERATURE,
            }),
        };

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::Status(status));
        }

        let text = match self.api {
            QuoteApi::ChatCompletions => response
                .json::<ChatResponse>()
                .await?
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content),
            QuoteApi::Responses => response.json::<ResponsesResponse>().await?.output_text,
        };

        Ok(text.unwrap_or_default().trim().to_owned())
    }
}

#[async_trait]
impl QuoteGenerator for HttpQuoteGenerator {
    async fn generate(&self, reading: &Reading, fallback_site: &str) -> String {
        let context = context_line(reading, fallback_site);
        debug!("requesting quote for {}", context);

        let start = tokio::time::Instant::now();
        let result = self.request_quote(&context).await;
        metrics::histogram!("relay_quote_duration_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(quote) if !quote.is_empty() => {
                metrics::counter!("relay_quotes_total", "outcome" => "generated").increment(1);
                quote
            }
            Ok(_) => {
                warn!("quote service returned no text, using fallback");
                metrics::counter!("relay_quotes_total", "outcome" => "empty").increment(1);
                EMPTY_RESPONSE_QUOTE.to_owned()
            }
            Err(error) => {
                warn!("quote request failed, using fallback: {}", error);
                metrics::counter!("relay_quotes_total", "outcome" => error.kind()).increment(1);
                FAILED_REQUEST_QUOTE.to_owned()
            }
        }
    }
}
