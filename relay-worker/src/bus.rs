use std::sync::Arc;
use std::time;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use tokio::sync;
use tracing::{debug, error, info};

use relay_common::health::{ComponentStatus, HealthHandle};

use crate::config::MqttConfig;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerError;
use crate::sink::{MqttSink, PublishAcks};

/// Capacity of the request channel between `AsyncClient` handles and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Build broker connection options from configuration.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.as_str(), &config.host, config.port);
    options
        .set_keep_alive(config.keep_alive.0)
        .set_clean_session(true);

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    options
}

/// Owns the MQTT event loop and feeds every inbound telemetry message to a `Dispatcher`.
pub struct MqttBus {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Subscription filter for inbound telemetry, re-issued on every (re)connect.
    filter: String,
    reconnect_interval: time::Duration,
    publish_timeout: time::Duration,
    /// Matches outgoing display publishes with their PubAck.
    acks: PublishAcks,
    /// Maximum number of dispatches in flight.
    max_concurrent_dispatches: usize,
    /// The liveness check handle, reported on every successful poll of the event loop.
    liveness: HealthHandle,
}

impl MqttBus {
    pub fn new(
        config: &MqttConfig,
        filter: String,
        max_concurrent_dispatches: usize,
        liveness: HealthHandle,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);

        Self {
            client,
            eventloop,
            filter,
            reconnect_interval: config.reconnect_interval.0,
            publish_timeout: config.publish_timeout.0,
            acks: PublishAcks::default(),
            max_concurrent_dispatches,
            liveness,
        }
    }

    /// A display sink publishing on this connection. Its publishes complete when this bus
    /// sees the broker's PubAck, so they only make progress while `run` is polling.
    pub fn sink(&self) -> MqttSink {
        MqttSink::new(self.client.clone(), self.acks.clone(), self.publish_timeout)
    }

    /// Drive the connection forever, handing each inbound message to `dispatcher` on its own task.
    ///
    /// Consumes the bus, so a connection has exactly one dispatcher for its whole life.
    /// Connection errors are logged and retried after the reconnect interval; only a
    /// subscription the client refuses to queue stops the loop.
    pub async fn run(mut self, dispatcher: Dispatcher) -> Result<(), WorkerError> {
        let semaphore = Arc::new(sync::Semaphore::new(self.max_concurrent_dispatches));
        let max_concurrent_dispatches = self.max_concurrent_dispatches;
        let report_semaphore_utilization = |semaphore: &sync::Semaphore| {
            metrics::gauge!("relay_dispatch_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / max_concurrent_dispatches as f64,
            );
        };

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to broker, subscribing to {}", self.filter);
                    self.client
                        .try_subscribe(&self.filter, QoS::AtLeastOnce)
                        .map_err(|error| WorkerError::Subscribe {
                            topic: self.filter.clone(),
                            error,
                        })?;
                    self.liveness.report_healthy().await;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    info!("subscription acknowledged: {:?}", ack.return_codes);
                    self.liveness.report_healthy().await;
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.acks.sent(pkid);
                    self.liveness.report_healthy().await;
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!("broker acknowledged publish {}", ack.pkid);
                    self.acks.acknowledged(ack.pkid);
                    self.liveness.report_healthy().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.liveness.report_healthy().await;
                    report_semaphore_utilization(&semaphore);
                    spawn_dispatch_task(dispatcher.clone(), semaphore.clone(), publish).await;
                }
                Ok(_) => {
                    self.liveness.report_healthy().await;
                }
                Err(error) => {
                    error!("mqtt connection error: {}", error);
                    self.liveness
                        .report_status(ComponentStatus::Unhealthy)
                        .await;
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }
    }
}

/// Spawn a Tokio task to dispatch a message once we successfully acquire a permit.
///
/// Waiting for the permit happens on the event loop, so a saturated relay stops reading from
/// the broker until a dispatch finishes.
///
/// # Arguments
///
/// * `dispatcher`: The pipeline to run on the message.
/// * `semaphore`: Bounds the number of concurrent dispatches. This function will panic if this semaphore is closed.
/// * `publish`: The message as received from the broker.
async fn spawn_dispatch_task(
    dispatcher: Dispatcher,
    semaphore: Arc<sync::Semaphore>,
    publish: Publish,
) -> tokio::task::JoinHandle<()> {
    let permit = semaphore
        .acquire_owned()
        .await
        .expect("semaphore has been closed");

    tokio::spawn(async move {
        dispatcher.dispatch(&publish.topic, &publish.payload).await;
        drop(permit);
    })
}
