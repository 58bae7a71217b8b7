use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Result};

use crate::follows::{XrpcConfig, DEFAULT_REFRESH_INTERVAL};
use crate::ingest::DEFAULT_CHECKPOINT_EVERY;

const REQUIRED_VARS: [&str; 4] = [
    "FEEDGEN_HOSTNAME",
    "FEEDGEN_HANDLE",
    "FEEDGEN_PASSWORD",
    "FEEDGEN_SERVICE_DID",
];

/// Process configuration, read once at startup from the environment.
#[derive(Clone)]
pub struct Settings {
    pub hostname: String,
    pub handle: String,
    pub password: String,
    pub service_did: String,
    pub db_path: PathBuf,
    pub db_retries: u32,
    pub db_retry_delay: Duration,
    pub pds_url: String,
    pub http_bind: String,
    pub http_timeout: Duration,
    pub follows_refresh_interval: Duration,
    pub stream_service: String,
    pub checkpoint_every: u64,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("hostname", &self.hostname)
            .field("handle", &self.handle)
            .field("password", &"<redacted>")
            .field("service_did", &self.service_did)
            .field("db_path", &self.db_path)
            .field("db_retries", &self.db_retries)
            .field("db_retry_delay", &self.db_retry_delay)
            .field("pds_url", &self.pds_url)
            .field("http_bind", &self.http_bind)
            .field("http_timeout", &self.http_timeout)
            .field("follows_refresh_interval", &self.follows_refresh_interval)
            .field("stream_service", &self.stream_service)
            .field("checkpoint_every", &self.checkpoint_every)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Every missing required
    /// variable is reported in one error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!(
                "the following required environment variables are missing or empty: {}",
                missing.join(", ")
            );
        }

        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{key} is not set"));

        let refresh_secs: u64 = parse_var(
            &get,
            "FEEDGEN_FOLLOWS_REFRESH_SECS",
            DEFAULT_REFRESH_INTERVAL.as_secs(),
        )?;
        if refresh_secs == 0 {
            bail!("FEEDGEN_FOLLOWS_REFRESH_SECS must be greater than zero");
        }

        Ok(Self {
            hostname: required("FEEDGEN_HOSTNAME")?,
            handle: required("FEEDGEN_HANDLE")?,
            password: required("FEEDGEN_PASSWORD")?,
            service_did: required("FEEDGEN_SERVICE_DID")?,
            db_path: get("FEEDGEN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("feedgen.sqlite3")),
            db_retries: parse_var(&get, "FEEDGEN_DB_RETRIES", 5)?,
            db_retry_delay: Duration::from_secs(parse_var(&get, "FEEDGEN_DB_RETRY_DELAY_SECS", 3)?),
            pds_url: get("FEEDGEN_PDS_URL").unwrap_or_else(|| "https://bsky.social".to_string()),
            http_bind: get("FEEDGEN_HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            http_timeout: Duration::from_secs(parse_var(&get, "FEEDGEN_HTTP_TIMEOUT_SECS", 30)?),
            follows_refresh_interval: Duration::from_secs(refresh_secs),
            stream_service: get("FEEDGEN_STREAM_SERVICE")
                .unwrap_or_else(|| "wss://bsky.network".to_string()),
            checkpoint_every: parse_var(&get, "FEEDGEN_CHECKPOINT_EVERY", DEFAULT_CHECKPOINT_EVERY)?,
        })
    }

    pub fn xrpc_config(&self) -> XrpcConfig {
        XrpcConfig {
            service_url: self.pds_url.clone(),
            identifier: self.handle.clone(),
            password: self.password.clone(),
            timeout: self.http_timeout,
        }
    }
}

fn parse_var<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("{key} must be a number, but received {raw:?}: {err}")),
        None => Ok(default),
    }
}
