use std::{fmt, time::Duration};

use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};

pub const HOST_ENV: &str = "RABBITMQ_HOST";
pub const PORT_ENV: &str = "RABBITMQ_PORT";
pub const USERNAME_ENV: &str = "RABBITMQ_USERNAME";
pub const PASSWORD_ENV: &str = "RABBITMQ_PASSWORD";
pub const VHOST_ENV: &str = "RABBITMQ_VHOST";

/// Where and how to reach the broker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default = "defaults::username")]
    pub username: String,

    #[serde(default = "defaults::password")]
    pub password: String,

    #[serde(default = "defaults::vhost")]
    pub vhost: String,

    /// Fixed wait between reconnection attempts (in seconds).
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Shown in the broker's management UI.
    #[serde(default = "defaults::connection_name")]
    pub connection_name: String,
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("vhost", &self.vhost)
            .field("reconnect_interval_secs", &self.reconnect_interval_secs)
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            username: defaults::username(),
            password: defaults::password(),
            vhost: defaults::vhost(),
            reconnect_interval_secs: defaults::reconnect_interval_secs(),
            connection_name: defaults::connection_name(),
        }
    }
}

impl BrokerConfig {
    /// Connection URI. The vhost is carried as-is, so `/` needs no escaping.
    #[must_use]
    pub fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }

    /// `host:port`, for log and error messages.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Overrides fields from the environment. Empty or unparsable values
    /// leave the current setting in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }
        if let Some(port) = lookup(PORT_ENV).and_then(|v| v.trim().parse().ok()) {
            self.port = port;
        }
        if let Some(username) = lookup(USERNAME_ENV) {
            self.username = username;
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.password = password;
        }
        if let Some(vhost) = lookup(VHOST_ENV) {
            self.vhost = vhost;
        }
    }
}

/// Intake and dispatch limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Unacknowledged deliveries the broker may push at once.
    ///
    /// Default: 1
    #[serde(default = "defaults::prefetch")]
    pub prefetch: u16,

    /// Concurrent dispatches.
    ///
    /// Default: 4
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Deliveries waiting for a free worker before intake blocks.
    ///
    /// Default: 16
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "defaults::consumer_tag")]
    pub consumer_tag: String,

    /// Deadline for sending one task (in seconds). The dispatcher waits a
    /// little longer than this so the send can be recorded as timed out.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// How long shutdown waits for in-flight work (in seconds).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: defaults::prefetch(),
            workers: defaults::workers(),
            queue_capacity: defaults::queue_capacity(),
            consumer_tag: defaults::consumer_tag(),
            task_timeout_secs: defaults::task_timeout_secs(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
        }
    }
}

/// Extra time the dispatcher allows on top of the send deadline for the
/// record updates around it.
const SETTLE_GRACE: Duration = Duration::from_secs(5);

impl ConsumerConfig {
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// The dispatcher's hard limit for one task.
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        self.task_timeout().saturating_add(SETTLE_GRACE)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

mod defaults {
    pub fn host() -> String {
        String::from("localhost")
    }

    pub const fn port() -> u16 {
        5672
    }

    pub fn username() -> String {
        String::from("guest")
    }

    pub fn password() -> String {
        String::from("guest")
    }

    pub fn vhost() -> String {
        String::from("/")
    }

    pub const fn reconnect_interval_secs() -> u64 {
        5
    }

    pub fn connection_name() -> String {
        String::from("postie")
    }

    pub const fn prefetch() -> u16 {
        1
    }

    pub const fn workers() -> usize {
        4
    }

    pub const fn queue_capacity() -> usize {
        16
    }

    pub fn consumer_tag() -> String {
        String::from("postie")
    }

    pub const fn task_timeout_secs() -> u64 {
        60
    }

    pub const fn shutdown_timeout_secs() -> u64 {
        30
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_broker_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.address(), "localhost:5672");
        assert_eq!(config.username, "guest");
        assert_eq!(config.vhost, "/");
        assert_eq!(config.reconnect_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_uri_carries_settings() {
        let config = BrokerConfig {
            host: "rabbit.internal".to_string(),
            port: 5673,
            username: "mailer".to_string(),
            password: "s3cret".to_string(),
            vhost: "mail".to_string(),
            ..BrokerConfig::default()
        };

        let uri = config.uri();
        assert_eq!(uri.authority.host, "rabbit.internal");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "mailer");
        assert_eq!(uri.authority.userinfo.password, "s3cret");
        assert_eq!(uri.vhost, "mail");
    }

    #[test]
    fn test_default_vhost_is_root() {
        assert_eq!(BrokerConfig::default().uri().vhost, "/");
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (HOST_ENV, "broker"),
            (PORT_ENV, "15672"),
            (PASSWORD_ENV, "hunter2"),
            (VHOST_ENV, ""),
        ]);

        let mut config = BrokerConfig::default();
        config.apply_env(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.host, "broker");
        assert_eq!(config.port, 15672);
        assert_eq!(config.username, "guest");
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.vhost, "/");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = BrokerConfig {
            password: "hunter2".to_string(),
            ..BrokerConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_consumer_defaults_from_partial_config() {
        let config: ConsumerConfig = ron::from_str("(workers: 8)").expect("valid ron");
        assert_eq!(config.workers, 8);
        assert_eq!(config.prefetch, 1);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(config.dispatch_timeout() > config.task_timeout());
    }
}
