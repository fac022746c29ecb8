use std::sync::Arc;

use tracing::{debug, error, info, warn};

use relay_common::cooldown::{Admission, CooldownGate};
use relay_common::display::{DisplayPayload, Priority};
use relay_common::reading::{ParseError, Reading};
use relay_common::topics;

use crate::providers::SiteNameProvider;
use crate::quote::QuoteGenerator;
use crate::sink::DisplaySink;

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The payload could not be decoded or routed; nothing was published.
    Dropped,
    /// A quote was generated too recently; nothing was published.
    CooldownDenied,
    Published(Priority),
    /// Everything up to the publish succeeded; the bus client refused the payload.
    PublishFailed(Priority),
}

/// Runs the enrichment pipeline for each inbound telemetry message:
/// normalize, pass the cooldown gate, generate a quote, classify and publish.
///
/// A `Dispatcher` is cheap to clone and every clone shares the same cooldown gate, so it can
/// be handed to as many concurrently running tasks as needed.
#[derive(Clone)]
pub struct Dispatcher {
    namespace: String,
    fallback_site: String,
    gate: Arc<CooldownGate>,
    generator: Arc<dyn QuoteGenerator>,
    sink: Arc<dyn DisplaySink>,
}

impl Dispatcher {
    pub fn new<P: SiteNameProvider + ?Sized>(
        namespace: &str,
        sites: &P,
        gate: Arc<CooldownGate>,
        generator: Arc<dyn QuoteGenerator>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            namespace: namespace.to_owned(),
            fallback_site: sites.site_name(),
            gate,
            generator,
            sink,
        }
    }

    /// Process a single message received on `topic`.
    ///
    /// Only undecodable messages and messages arriving during the cooldown stop early; every
    /// other failure is absorbed along the way so that a reading which gets past the gate
    /// always ends in a publish attempt.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        metrics::counter!("relay_messages_received_total").increment(1);

        let (reading, display_topic) = match self.normalize(topic, payload) {
            Ok(normalized) => normalized,
            Err(error) => {
                warn!("dropping message on {}: {}", topic, error);
                metrics::counter!("relay_messages_dropped_total", "reason" => "parse").increment(1);
                return DispatchOutcome::Dropped;
            }
        };

        if let Admission::Denied(remaining) = self.gate.try_acquire() {
            debug!(
                "skipping quote for {} (cooldown, {}ms left)",
                topic,
                remaining.as_millis()
            );
            metrics::counter!("relay_messages_dropped_total", "reason" => "cooldown").increment(1);
            return DispatchOutcome::CooldownDenied;
        }

        let quote = self.generator.generate(&reading, &self.fallback_site).await;
        let display = DisplayPayload::new(quote, &reading, &self.fallback_site);
        let priority = display.priority;

        match self.sink.publish(&display_topic, &display).await {
            Ok(()) => {
                info!("published {} display for {} on {}", priority, reading.site, display_topic);
                metrics::counter!("relay_display_published_total", "priority" => priority.as_str())
                    .increment(1);
                DispatchOutcome::Published(priority)
            }
            Err(error) => {
                error!("failed to publish display on {}: {}", display_topic, error);
                metrics::counter!("relay_display_publish_failures_total").increment(1);
                DispatchOutcome::PublishFailed(priority)
            }
        }
    }

    /// Decode the payload and work out which display topic the result belongs on.
    fn normalize(&self, topic: &str, payload: &[u8]) -> Result<(Reading, String), ParseError> {
        let received_at = chrono::Utc::now().timestamp_millis();
        let mut reading = Reading::from_payload(payload, received_at)?;

        if reading.site.is_empty() {
            reading.site.clone_from(&self.fallback_site);
        }

        let device = topics::device_from_telemetry_topic(&self.namespace, topic)
            .or(Some(reading.device_id.as_str()).filter(|device| !device.is_empty()))
            .ok_or_else(|| ParseError::UnroutableTopic(topic.to_owned()))?;
        let display_topic = topics::display_topic(&self.namespace, device);

        Ok((reading, display_topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time;

    #[derive(Default)]
    struct CannedQuote {
        calls: AtomicUsize,
        readings: Mutex<Vec<Reading>>,
    }

    #[async_trait]
    impl QuoteGenerator for CannedQuote {
        async fn generate(&self, reading: &Reading, _fallback_site: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.readings.lock().unwrap().push(reading.clone());
            "A canned quote.".to_owned()
        }
    }

    #[derive(Default)]
    struct MemorySink {
        published: Mutex<Vec<(String, DisplayPayload)>>,
    }

    #[async_trait]
    impl DisplaySink for MemorySink {
        async fn publish(&self, topic: &str, payload: &DisplayPayload) -> Result<(), PublishError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.clone()));
            Ok(())
        }
    }

    fn dispatcher(
        cooldown: time::Duration,
    ) -> (Dispatcher, Arc<CannedQuote>, Arc<MemorySink>) {
        let generator = Arc::new(CannedQuote::default());
        let sink = Arc::new(MemorySink::default());
        let dispatcher = Dispatcher::new(
            "auralink",
            "kandy-plant",
            Arc::new(CooldownGate::new(cooldown)),
            generator.clone(),
            sink.clone(),
        );
        (dispatcher, generator, sink)
    }

    #[tokio::test]
    async fn publishes_enriched_reading() {
        let (dispatcher, generator, sink) = dispatcher(time::Duration::from_secs(20));

        let outcome = dispatcher
            .dispatch(
                "auralink/pump-01/telemetry",
                br#"{"site":"kandy-plant","deviceId":"pump-01","ts":1700000000000,"temp":31.5,"hum":40}"#,
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Published(Priority::Urgent));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let (topic, payload) = &published[0];
        assert_eq!(topic, "auralink/pump-01/display");
        assert_eq!(payload.quote, "A canned quote.");
        assert_eq!(payload.priority, Priority::Urgent);
        assert!(!payload.email_summary.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let (dispatcher, generator, sink) = dispatcher(time::Duration::from_secs(20));

        for payload in [&b"{not json"[..], &b"[1, 2]"[..], &b""[..]] {
            let outcome = dispatcher
                .dispatch("auralink/pump-01/telemetry", payload)
                .await;
            assert_eq!(outcome, DispatchOutcome::Dropped);
        }

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_message_does_not_start_cooldown() {
        let (dispatcher, _, sink) = dispatcher(time::Duration::from_secs(20));

        dispatcher.dispatch("auralink/pump-01/telemetry", b"oops").await;
        let outcome = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"temp":20}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Published(Priority::Normal));
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_message_within_cooldown_is_dropped() {
        let (dispatcher, generator, sink) = dispatcher(time::Duration::from_secs(20));

        let first = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"temp":25}"#)
            .await;
        let second = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"temp":35}"#)
            .await;

        assert_eq!(first, DispatchOutcome::Published(Priority::Normal));
        assert_eq!(second, DispatchOutcome::CooldownDenied);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn defaults_site_and_timestamp() {
        let (dispatcher, generator, sink) = dispatcher(time::Duration::ZERO);
        let before = chrono::Utc::now().timestamp_millis();

        let outcome = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"temp":10,"hum":10}"#)
            .await;

        let after = chrono::Utc::now().timestamp_millis();
        assert_eq!(outcome, DispatchOutcome::Published(Priority::Normal));

        let readings = generator.readings.lock().unwrap();
        assert_eq!(readings[0].site, "kandy-plant");
        assert!(readings[0].timestamp_millis >= before && readings[0].timestamp_millis <= after);

        let published = sink.published.lock().unwrap();
        assert!(published[0].1.email_summary.contains("Site: kandy-plant"));
    }

    #[tokio::test]
    async fn routes_by_topic_then_device_id() {
        let (dispatcher, _, sink) = dispatcher(time::Duration::ZERO);

        dispatcher
            .dispatch("auralink/fan-7/telemetry", br#"{"deviceId":"pump-01"}"#)
            .await;
        dispatcher
            .dispatch("legacy/readings", br#"{"deviceId":"pump-02"}"#)
            .await;
        let unroutable = dispatcher.dispatch("legacy/readings", br#"{"temp":1}"#).await;

        assert_eq!(unroutable, DispatchOutcome::Dropped);
        let topics: Vec<_> = sink
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect();
        assert_eq!(topics, ["auralink/fan-7/display", "auralink/pump-02/display"]);
    }

    #[tokio::test]
    async fn publish_failure_keeps_cooldown() {
        struct FailingSink;

        #[async_trait]
        impl DisplaySink for FailingSink {
            async fn publish(&self, _: &str, _: &DisplayPayload) -> Result<(), PublishError> {
                Err(serde_json::from_str::<serde_json::Value>("{")
                    .unwrap_err()
                    .into())
            }
        }

        let generator = Arc::new(CannedQuote::default());
        let dispatcher = Dispatcher::new(
            "auralink",
            "kandy-plant",
            Arc::new(CooldownGate::new(time::Duration::from_secs(20))),
            generator.clone(),
            Arc::new(FailingSink),
        );

        let first = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"hum":65}"#)
            .await;
        let second = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"hum":65}"#)
            .await;

        assert_eq!(first, DispatchOutcome::PublishFailed(Priority::Attention));
        assert_eq!(second, DispatchOutcome::CooldownDenied);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unacknowledged_publish_is_a_failure() {
        // Event loop is never polled, so the broker never acknowledges.
        let options = rumqttc::MqttOptions::new("dispatcher-test", "127.0.0.1", 9);
        let (client, _eventloop) = rumqttc::AsyncClient::new(options, 10);
        let sink = crate::sink::MqttSink::new(
            client,
            crate::sink::PublishAcks::default(),
            time::Duration::from_millis(100),
        );
        let dispatcher = Dispatcher::new(
            "auralink",
            "kandy-plant",
            Arc::new(CooldownGate::new(time::Duration::from_secs(20))),
            Arc::new(CannedQuote::default()),
            Arc::new(sink),
        );

        let outcome = dispatcher
            .dispatch("auralink/pump-01/telemetry", br#"{"temp":31}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::PublishFailed(Priority::Urgent));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_generate_once() {
        let (dispatcher, generator, sink) = dispatcher(time::Duration::from_secs(20));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let payload = format!(r#"{{"temp":{}}}"#, 20 + i);
                    dispatcher
                        .dispatch("auralink/pump-01/telemetry", payload.as_bytes())
                        .await
                })
            })
            .collect();

        let mut published = 0;
        for task in tasks {
            if let DispatchOutcome::Published(_) = task.await.unwrap() {
                published += 1;
            }
        }

        assert_eq!(published, 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }
}
