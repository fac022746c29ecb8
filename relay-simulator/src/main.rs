//! Publish synthetic telemetry for a single device until interrupted.
use std::time::Duration;

use envconfig::Envconfig;
use eyre::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use tokio::signal;
use tracing::{info, warn};

use config::Config;
use telemetry::Samples;

mod config;
mod telemetry;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let mut options = MqttOptions::new(
        config.mqtt_client_id.as_str(),
        &config.mqtt_host,
        config.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(username, config.mqtt_password.clone().unwrap_or_default());
    }
    let (client, mut eventloop) = AsyncClient::new(options, 16);

    let topic = config.telemetry_topic();
    info!(
        "publishing to {} every {}ms via {}:{}",
        topic, config.interval, config.mqtt_host, config.mqtt_port
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(config.interval.get()));
    let mut samples = Samples::new(&config.site_name, &config.device_id);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp_millis();
                let (tick, sample) = samples.next_at(now);

                let payload = serde_json::to_vec(&sample)?;
                match client.try_publish(&topic, QoS::AtLeastOnce, false, payload) {
                    Ok(()) => info!("queued sample {}: {}°C, {}%", tick, sample.temp, sample.humidity),
                    Err(error) => warn!("dropping sample {}: {}", tick, error),
                }
            }
            event = eventloop.poll() => {
                if let Err(error) = event {
                    warn!("mqtt connection error: {}", error);
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
            result = &mut shutdown => {
                result?;
                info!("interrupted, disconnecting");
                break;
            }
        }
    }

    client.try_disconnect()?;
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("broker did not see a clean disconnect");
    }

    Ok(())
}
