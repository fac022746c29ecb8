use std::fmt;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use relay_common::topics;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub mqtt: MqttConfig,

    #[envconfig(default = "auralink")]
    pub topic_namespace: NonEmptyString,

    /// Device whose telemetry is relayed. `+` relays every device in the namespace.
    #[envconfig(default = "pump-01")]
    pub device_id: NonEmptyString,

    /// Used for readings that do not name their site.
    #[envconfig(default = "kandy-plant")]
    pub site_name: String,

    #[envconfig(nested = true)]
    pub quote: QuoteConfig,

    #[envconfig(default = "20000")]
    pub quote_cooldown: EnvMsDuration,

    #[envconfig(default = "64")]
    pub max_concurrent_dispatches: usize,

    /// Log display payloads instead of publishing them.
    #[envconfig(default = "false")]
    pub print_sink: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The subscription filter for inbound telemetry.
    pub fn telemetry_filter(&self) -> String {
        topics::telemetry_topic(self.topic_namespace.as_str(), self.device_id.as_str())
    }
}

#[derive(Envconfig, Clone)]
pub struct MqttConfig {
    #[envconfig(from = "MQTT_HOST", default = "localhost")]
    pub host: String,

    #[envconfig(from = "MQTT_PORT", default = "1883")]
    pub port: u16,

    #[envconfig(from = "MQTT_USERNAME")]
    pub username: Option<String>,

    #[envconfig(from = "MQTT_PASSWORD")]
    pub password: Option<String>,

    #[envconfig(from = "MQTT_CLIENT_ID", default = "auralink-relay")]
    pub client_id: NonEmptyString,

    #[envconfig(from = "MQTT_KEEP_ALIVE", default = "60000")]
    pub keep_alive: EnvKeepAlive,

    #[envconfig(from = "MQTT_RECONNECT_INTERVAL", default = "3000")]
    pub reconnect_interval: EnvMsDuration,

    /// How long a display publish waits for the broker's PubAck.
    #[envconfig(from = "MQTT_PUBLISH_TIMEOUT", default = "10000")]
    pub publish_timeout: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct QuoteConfig {
    #[envconfig(from = "QUOTE_API_KEY")]
    pub api_key: Option<String>,

    #[envconfig(
        from = "QUOTE_ENDPOINT",
        default = "https://api.openai.com/v1/chat/completions"
    )]
    pub endpoint: String,

    #[envconfig(from = "QUOTE_MODEL", default = "gpt-4o-mini")]
    pub model: String,

    #[envconfig(from = "QUOTE_API", default = "chat")]
    pub api: QuoteApi,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "20000")]
    pub request_timeout: EnvMsDuration,
}

/// Request and response shape spoken by the generative-text endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteApi {
    /// `messages` in, `choices[0].message.content` out.
    ChatCompletions,
    /// `input` in, `output_text` out.
    Responses,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseQuoteApiError(String);

impl fmt::Display for ParseQuoteApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a supported quote API, use chat or responses", self.0)
    }
}

impl FromStr for QuoteApi {
    type Err = ParseQuoteApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "chat" => Ok(QuoteApi::ChatCompletions),
            "responses" => Ok(QuoteApi::Responses),
            invalid => Err(ParseQuoteApiError(invalid.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// MQTT keep-alive in milliseconds. Zero turns it off, anything else must be at least a second.
#[derive(Debug, Clone, Copy)]
pub struct EnvKeepAlive(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvKeepAliveError;

impl fmt::Display for ParseEnvKeepAliveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "keep-alive must be 0 or at least 1000 milliseconds")
    }
}

impl FromStr for EnvKeepAlive {
    type Err = ParseEnvKeepAliveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let EnvMsDuration(duration) = s.parse().map_err(|_| ParseEnvKeepAliveError)?;

        if !duration.is_zero() && duration < time::Duration::from_secs(1) {
            return Err(ParseEnvKeepAliveError);
        }

        Ok(EnvKeepAlive(duration))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
