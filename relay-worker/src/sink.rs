use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time;

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use relay_common::display::DisplayPayload;

use crate::error::PublishError;

/// Where display payloads go once assembled.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    async fn publish(&self, topic: &str, payload: &DisplayPayload) -> Result<(), PublishError>;
}

/// Logs payloads instead of publishing them.
pub struct PrintSink {}

#[async_trait]
impl DisplaySink for PrintSink {
    async fn publish(&self, topic: &str, payload: &DisplayPayload) -> Result<(), PublishError> {
        let encoded = payload.to_json()?;
        info!(
            "display payload for {}: {}",
            topic,
            String::from_utf8_lossy(&encoded)
        );

        Ok(())
    }
}

/// Pairs QoS 1 publishes with the broker's PubAck.
///
/// Packet ids are assigned inside the event loop, so a sink cannot know the id of its own
/// publish. Waiters are queued in the order their publishes enter the client; each time the
/// event loop writes a publish out it moves the oldest waiter under that packet id, and the
/// matching PubAck releases it.
#[derive(Clone, Default)]
pub struct PublishAcks {
    state: Arc<Mutex<AckState>>,
}

#[derive(Default)]
struct AckState {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl PublishAcks {
    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().queued.push_back(tx);
        rx
    }

    /// Withdraw the most recent waiter, whose publish never reached the client.
    fn withdraw_last(&self) {
        self.lock().queued.pop_back();
    }

    /// The event loop wrote publish `pkid` to the broker.
    pub fn sent(&self, pkid: u16) {
        let mut state = self.lock();
        // Retransmissions after a reconnect keep their packet id and their waiter.
        if state.in_flight.contains_key(&pkid) {
            return;
        }
        match state.queued.pop_front() {
            Some(waiter) => {
                state.in_flight.insert(pkid, waiter);
            }
            None => warn!("publish {} went out with nobody waiting on it", pkid),
        }
    }

    /// The broker acknowledged publish `pkid`.
    pub fn acknowledged(&self, pkid: u16) {
        let Some(waiter) = self.lock().in_flight.remove(&pkid) else {
            return;
        };
        if waiter.send(()).is_err() {
            debug!("publish {} acknowledged after its sender gave up", pkid);
        }
    }
}

/// Publishes payloads on the MQTT bus with at-least-once delivery.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
    acks: PublishAcks,
    /// Held while a waiter is queued and its publish handed to the client, so both happen
    /// in the same order.
    order: Arc<tokio::sync::Mutex<()>>,
    ack_timeout: time::Duration,
}

impl MqttSink {
    /// `acks` must be the tracker fed by the event loop behind `client`.
    pub fn new(client: AsyncClient, acks: PublishAcks, ack_timeout: time::Duration) -> Self {
        Self {
            client,
            acks,
            order: Arc::new(tokio::sync::Mutex::new(())),
            ack_timeout,
        }
    }
}

#[async_trait]
impl DisplaySink for MqttSink {
    /// Resolves once the broker has acknowledged the publish, or fails after `ack_timeout`.
    async fn publish(&self, topic: &str, payload: &DisplayPayload) -> Result<(), PublishError> {
        let encoded = payload.to_json()?;

        let acknowledged = {
            let _order = self.order.lock().await;
            let acknowledged = self.acks.enqueue();
            if let Err(error) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, encoded)
                .await
            {
                self.acks.withdraw_last();
                return Err(error.into());
            }
            acknowledged
        };

        match tokio::time::timeout(self.ack_timeout, acknowledged).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PublishError::Abandoned),
            Err(_) => Err(PublishError::AckTimeout(self.ack_timeout)),
        }
    }
}
