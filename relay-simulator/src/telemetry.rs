use serde::Serialize;

/// A synthetic reading, shaped like what field devices publish.
#[derive(Debug, Serialize, PartialEq)]
pub struct Sample<'a> {
    pub ts: i64,
    pub site: &'a str,
    #[serde(rename = "deviceId")]
    pub device_id: &'a str,
    pub temp: f64,
    pub humidity: f64,
}

impl<'a> Sample<'a> {
    /// The reading for the `tick`-th interval. Temperature climbs in 0.4°C steps over a
    /// 12-tick cycle and humidity in 1.8% steps over a 10-tick cycle, so the stream
    /// regularly crosses every priority threshold.
    pub fn at_tick(tick: u64, site: &'a str, device_id: &'a str, ts: i64) -> Self {
        Sample {
            ts,
            site,
            device_id,
            temp: round_to(27.0 + (tick % 12) as f64 * 0.4, 2),
            humidity: round_to(55.0 + (tick % 10) as f64 * 1.8, 1),
        }
    }
}

/// Numbers samples for one device, starting at tick 0.
pub struct Samples<'a> {
    next_tick: u64,
    site: &'a str,
    device_id: &'a str,
}

impl<'a> Samples<'a> {
    pub fn new(site: &'a str, device_id: &'a str) -> Self {
        Self {
            next_tick: 0,
            site,
            device_id,
        }
    }

    /// The next sample and the tick it was taken at.
    pub fn next_at(&mut self, ts: i64) -> (u64, Sample<'a>) {
        let tick = self.next_tick;
        self.next_tick += 1;
        (tick, Sample::at_tick(tick, self.site, self.device_id, ts))
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
