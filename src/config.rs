use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::store::StoreSettings;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Presence and chat relay", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:3001")]
    pub bind: SocketAddr,

    /// Seconds without a heartbeat before a user drops off the online list
    #[arg(long, env = "RELAY_PRESENCE_STALE_SECS", default_value_t = 300)]
    pub presence_stale_secs: u64,

    /// Seconds without a heartbeat before the maintenance purge removes a user
    #[arg(long, env = "RELAY_PRESENCE_PURGE_SECS", default_value_t = 600)]
    pub presence_purge_secs: u64,

    /// How often the maintenance purge runs
    #[arg(long, env = "RELAY_PURGE_INTERVAL_SECS", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub purge_interval_secs: u64,

    /// Chat messages kept in memory
    #[arg(long, env = "RELAY_MESSAGE_CAPACITY", default_value_t = 100,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub message_capacity: u64,

    /// Messages returned when a client asks without a limit
    #[arg(long, env = "RELAY_DEFAULT_MESSAGE_LIMIT", default_value_t = 100,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub default_message_limit: u64,

    /// Largest accepted request body
    #[arg(long, env = "RELAY_MAX_BODY_BYTES", default_value_t = 64 * 1024)]
    pub max_body_bytes: u64,

    /// PEM certificate; TLS is used only when both cert and key load
    #[arg(long, env = "RELAY_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "RELAY_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl Config {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.presence_stale_secs)
    }

    pub fn purge_after(&self) -> Duration {
        Duration::from_secs(self.presence_purge_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            stale_after: self.stale_after(),
            message_capacity: usize::try_from(self.message_capacity).unwrap_or(usize::MAX),
            default_message_limit: usize::try_from(self.default_message_limit)
                .unwrap_or(usize::MAX),
        }
    }
}
