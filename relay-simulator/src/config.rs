use std::num::NonZeroU64;

use envconfig::Envconfig;
use relay_common::topics;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "MQTT_HOST", default = "localhost")]
    pub mqtt_host: String,

    #[envconfig(from = "MQTT_PORT", default = "1883")]
    pub mqtt_port: u16,

    #[envconfig(from = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[envconfig(from = "MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    #[envconfig(from = "MQTT_CLIENT_ID", default = "auralink-simulator")]
    pub mqtt_client_id: String,

    #[envconfig(default = "auralink")]
    pub topic_namespace: String,

    #[envconfig(default = "pump-01")]
    pub device_id: String,

    #[envconfig(default = "kandy-plant")]
    pub site_name: String,

    /// Milliseconds between samples.
    #[envconfig(default = "5000")]
    pub interval: NonZeroU64,
}

impl Config {
    pub fn telemetry_topic(&self) -> String {
        topics::telemetry_topic(&self.topic_namespace, &self.device_id)
    }
}
