//! Relay telemetry from the bus to display devices, enriched with a generated quote and a priority.
use std::sync::Arc;

use envconfig::Envconfig;
use futures::future::{select, Either};
use tracing::{error, info};

use relay_common::cooldown::CooldownGate;
use relay_common::health::HealthRegistry;
use relay_common::metrics::{serve, setup_metrics_recorder};
use relay_worker::bus::MqttBus;
use relay_worker::config::Config;
use relay_worker::dispatcher::Dispatcher;
use relay_worker::error::WorkerError;
use relay_worker::handlers;
use relay_worker::quote::HttpQuoteGenerator;
use relay_worker::sink::{DisplaySink, PrintSink};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    // Pings go out every keep-alive interval even when the bus is quiet.
    let eventloop_deadline = match config.mqtt.keep_alive.0 {
        keep_alive if keep_alive.is_zero() => time::Duration::minutes(2),
        keep_alive => {
            time::Duration::try_from(keep_alive * 2).unwrap_or(time::Duration::minutes(2))
        }
    };
    let eventloop_liveness = liveness
        .register("mqtt-eventloop".to_string(), eventloop_deadline)
        .await;

    let bus = MqttBus::new(
        &config.mqtt,
        config.telemetry_filter(),
        config.max_concurrent_dispatches,
        eventloop_liveness,
    );

    let sink: Arc<dyn DisplaySink> = if config.print_sink {
        Arc::new(PrintSink {})
    } else {
        Arc::new(bus.sink())
    };

    let generator = HttpQuoteGenerator::new(
        &config.quote.endpoint,
        &config.quote.model,
        config.quote.api,
        config.quote.request_timeout.0,
        &config,
    )?;

    let dispatcher = Dispatcher::new(
        config.topic_namespace.as_str(),
        &config,
        Arc::new(CooldownGate::new(config.quote_cooldown.0)),
        Arc::new(generator),
        sink,
    );

    let recorder_handle = setup_metrics_recorder();
    let app = handlers::app(liveness, Some(recorder_handle));
    info!(
        "relaying {} via {}:{}, status on {}",
        config.telemetry_filter(),
        config.mqtt.host,
        config.mqtt.port,
        config.bind()
    );

    let http_server = Box::pin(serve(app, config.bind()));
    let relay = Box::pin(bus.run(dispatcher));

    match select(http_server, relay).await {
        Either::Left((server_result, _)) => {
            server_result?;
            error!("status server exited");
            Ok(())
        }
        Either::Right((relay_result, _)) => {
            relay_result?;
            Err(WorkerError::EventLoopExited)
        }
    }
}
