//! Topic layout shared by devices, the relay and the simulator:
//! `<namespace>/<device>/telemetry` inbound and `<namespace>/<device>/display` outbound.

pub const TELEMETRY: &str = "telemetry";
pub const DISPLAY: &str = "display";

/// Any single level, for subscribing to every device in a namespace.
pub const ANY_DEVICE: &str = "+";

pub fn telemetry_topic(namespace: &str, device: &str) -> String {
    format!("{}/{}/{}", namespace, device, TELEMETRY)
}

pub fn display_topic(namespace: &str, device: &str) -> String {
    format!("{}/{}/{}", namespace, device, DISPLAY)
}

/// Extract the device from a telemetry topic in `namespace`, if the topic has that shape.
pub fn device_from_telemetry_topic<'a>(namespace: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(namespace)?.strip_prefix('/')?;
    let (device, suffix) = rest.split_once('/')?;

    if suffix != TELEMETRY || device.is_empty() || device == ANY_DEVICE {
        return None;
    }

    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics() {
        assert_eq!(telemetry_topic("auralink", "pump-01"), "auralink/pump-01/telemetry");
        assert_eq!(display_topic("auralink", "pump-01"), "auralink/pump-01/display");
        assert_eq!(telemetry_topic("auralink", ANY_DEVICE), "auralink/+/telemetry");
    }

    #[test]
    fn parses_device() {
        assert_eq!(
            device_from_telemetry_topic("auralink", "auralink/pump-01/telemetry"),
            Some("pump-01")
        );
        assert_eq!(
            device_from_telemetry_topic("plant/a", "plant/a/fan-3/telemetry"),
            Some("fan-3")
        );
    }

    #[test]
    fn rejects_other_shapes() {
        for topic in [
            "auralink/pump-01/display",
            "auralink/telemetry",
            "auralink//telemetry",
            "auralink/pump-01/extra/telemetry",
            "other/pump-01/telemetry",
            "auralinkx/pump-01/telemetry",
        ] {
            assert_eq!(device_from_telemetry_topic("auralink", topic), None, "{}", topic);
        }
    }
}
