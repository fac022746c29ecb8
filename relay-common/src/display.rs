use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reading::Reading;

/// How urgently the display should draw attention to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Attention,
    Urgent,
}

pub const URGENT_TEMPERATURE: f64 = 30.0;
pub const URGENT_HUMIDITY: f64 = 70.0;
pub const ATTENTION_TEMPERATURE: f64 = 28.0;
pub const ATTENTION_HUMIDITY: f64 = 60.0;

impl Priority {
    /// Classify a reading by threshold. Thresholds are inclusive and either signal alone is
    /// enough to reach a tier; a missing signal never contributes.
    pub fn classify(temperature: Option<f64>, humidity: Option<f64>) -> Self {
        let reaches = |value: Option<f64>, threshold: f64| value.is_some_and(|v| v >= threshold);

        if reaches(temperature, URGENT_TEMPERATURE) || reaches(humidity, URGENT_HUMIDITY) {
            Priority::Urgent
        } else if reaches(temperature, ATTENTION_TEMPERATURE)
            || reaches(humidity, ATTENTION_HUMIDITY)
        {
            Priority::Attention
        } else {
            Priority::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Attention => "attention",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The message a display device receives on its display topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPayload {
    pub quote: String,
    pub email_summary: String,
    pub priority: Priority,
}

impl DisplayPayload {
    pub fn new(quote: String, reading: &Reading, fallback_site: &str) -> Self {
        Self {
            quote,
            email_summary: email_summary(reading, fallback_site),
            priority: Priority::classify(reading.temperature, reading.humidity),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Placeholder for the inbox digest shown under the quote. No mail is read yet.
pub fn email_summary(reading: &Reading, fallback_site: &str) -> String {
    format!(
        "\u{2022} Site: {}\n\u{2022} Recent conditions \u{2014} Temp: {}°C, Humidity: {}%\n\u{2022} No new emails processed (placeholder)\n\u{2022} Next: enable IMAP to summarize unread messages",
        reading.site_or(fallback_site),
        reading.temperature_label(),
        reading.humidity_label(),
    )
}
