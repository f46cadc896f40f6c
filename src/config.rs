use std::time::Duration;

use crate::OpKind;

/// Engine configuration.
///
/// Timeouts bound how long a caller waits for the platform callback. They
/// never cancel the platform request itself.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub disconnect_timeout: Duration,
    /// Timeout for each service, characteristic, or descriptor discovery.
    #[serde(with = "millis")]
    pub discovery_timeout: Duration,
    /// Timeout for characteristic and descriptor reads, writes, and
    /// notification toggles.
    #[serde(with = "millis")]
    pub op_timeout: Duration,
    /// Timeout for RSSI reads and MTU requests.
    #[serde(with = "millis")]
    pub link_timeout: Duration,
    /// ATT MTU assumed until a larger one is negotiated
    /// ([Vol 3] Part F, Section 3.2.8).
    pub default_mtu: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(10),
            link_timeout: Duration::from_secs(10),
            default_mtu: 23,
        }
    }
}

impl Config {
    /// Parses a JSON configuration. Missing fields take their default values.
    #[cfg(feature = "json")]
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Returns the timeout for an operation kind.
    #[must_use]
    pub const fn timeout(&self, op: OpKind) -> Duration {
        use OpKind::*;
        match op {
            Connect => self.connect_timeout,
            Disconnect => self.disconnect_timeout,
            DiscoverServices
            | DiscoverIncludedServices
            | DiscoverCharacteristics
            | DiscoverDescriptors => self.discovery_timeout,
            ReadRssi | RequestMtu => self.link_timeout,
            StartScan | StopScan | ReadCharacteristic | WriteCharacteristic | SetNotify
            | ReadDescriptor | WriteDescriptor => self.op_timeout,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
