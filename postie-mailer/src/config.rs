use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

pub const HOST_ENV: &str = "SMTP_HOST";
pub const PORT_ENV: &str = "SMTP_PORT";
pub const USERNAME_ENV: &str = "SMTP_USERNAME";
pub const PASSWORD_ENV: &str = "SMTP_PASSWORD";
pub const FROM_ENV: &str = "SMTP_FROM";

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS.
    #[default]
    StartTls,
    /// TLS from the first byte (SMTPS).
    Tls,
    /// No encryption. Only for local relays and tests.
    None,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Also the sender address.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Display name of the sender.
    #[serde(default = "defaults::from")]
    pub from: String,

    #[serde(default)]
    pub tls: TlsMode,

    /// Connection timeout (in seconds).
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// Directory holding `<template>.html` files.
    #[serde(default = "defaults::templates_dir")]
    pub templates_dir: PathBuf,
}

impl fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("tls", &self.tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("templates_dir", &self.templates_dir)
            .finish()
    }
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            username: String::new(),
            password: String::new(),
            from: defaults::from(),
            tls: TlsMode::default(),
            timeout_secs: defaults::timeout_secs(),
            templates_dir: defaults::templates_dir(),
        }
    }
}

impl MailerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Overrides fields from the `SMTP_*` environment variables. Empty or
    /// unparsable values leave the current setting in place.
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
        if let Some(from) = lookup(FROM_ENV) {
            self.from = from;
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn host() -> String {
        String::from("localhost")
    }

    pub const fn port() -> u16 {
        587
    }

    pub fn from() -> String {
        String::from("Postie")
    }

    pub const fn timeout_secs() -> u64 {
        10
    }

    pub fn templates_dir() -> PathBuf {
        PathBuf::from("templates")
    }
}
