//! Client construction parameters, serde-loadable by a consuming binary.
//!
//! The crate itself only derives [`serde::Serialize`]/[`serde::Deserialize`]
//! — it never picks a format. A binary decides TOML/JSON/etc. the way the
//! teacher's daemon crate loads its own `Config` from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}

fn default_client_address() -> String {
    "127.0.0.1".to_string()
}

fn default_multicast_address() -> String {
    "239.255.42.99".to_string()
}

fn default_command_port() -> u16 {
    1510
}

fn default_data_port() -> u16 {
    1511
}

fn default_queue() -> i32 {
    10
}

fn default_keep_alive_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_echo_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_clock_sync_period() -> Duration {
    Duration::from_secs(500)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub client_address: String,
    pub multicast_address: String,
    /// Non-empty to discover the server first instead of connecting
    /// directly.
    pub discovery_address: String,
    pub use_multicast: bool,
    pub command_port: u16,
    pub data_port: u16,
    /// `< 0` disables the inbound frame queue; `0` makes it unbounded;
    /// `> 0` is the head-drop bound.
    pub queue: i32,
    #[serde(with = "duration_secs")]
    pub keep_alive_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub echo_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub clock_sync_period: Duration,
    pub sync_clock: bool,
    pub estimate_skew: bool,
    /// Preserves a quirk in the original implementation: on the unicast
    /// path, `Connect` is sent once at command-channel setup and again
    /// after the data channel opens. Some server builds appear to need
    /// the second handshake; default on to match observed behavior.
    pub double_connect_on_unicast: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_address: default_server_address(),
            client_address: default_client_address(),
            multicast_address: default_multicast_address(),
            discovery_address: String::new(),
            use_multicast: true,
            command_port: default_command_port(),
            data_port: default_data_port(),
            queue: default_queue(),
            keep_alive_timeout: default_keep_alive_timeout(),
            connect_timeout: default_connect_timeout(),
            echo_timeout: default_echo_timeout(),
            clock_sync_period: default_clock_sync_period(),
            sync_clock: true,
            estimate_skew: false,
            double_connect_on_unicast: true,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
