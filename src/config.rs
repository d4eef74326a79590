use crate::accumulator::PolicyKind;
use crate::telemetry::Channel;
use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE_URL: &str = "http://localhost:5000/api/actualsensor-data";
const DEFAULT_HTTP_BIND: &str = "0.0.0.0:5001";
const DEFAULT_CHANNELS: &str = "actualsensor1=sensor1,actualsensor2=sensor2,actualsensor3=sensor3";

fn setup_config_path() -> Option<PathBuf> {
    env::var("FORECAST_SETUP_CONFIG_PATH")
        .ok()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Optional JSON file with the same settings as the environment, keyed without the
/// `FORECAST_` prefix.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfigOverrides {
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    retry_backoff_ms: Option<u64>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default)]
    window_size: Option<usize>,
    #[serde(default)]
    channels: Option<String>,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    anchor_channel: Option<String>,
    #[serde(default)]
    pair_channels: Option<String>,
    #[serde(default)]
    steps: Option<usize>,
    #[serde(default)]
    model_path: Option<String>,
    #[serde(default)]
    scaler_path: Option<String>,
    #[serde(default)]
    predict_timeout_ms: Option<u64>,
}

impl SetupConfigOverrides {
    fn get(&self, key: &str) -> Option<String> {
        let number = |value: Option<u64>| value.filter(|v| *v != 0).map(|v| v.to_string());
        let count = |value: Option<usize>| value.filter(|v| *v != 0).map(|v| v.to_string());
        match key {
            "FORECAST_SOURCE_URL" => self.source_url.clone(),
            "FORECAST_HTTP_BIND" => self.http_bind.clone(),
            "FORECAST_POLL_INTERVAL_MS" => number(self.poll_interval_ms),
            "FORECAST_RETRY_BACKOFF_MS" => number(self.retry_backoff_ms),
            "FORECAST_REQUEST_TIMEOUT_MS" => number(self.request_timeout_ms),
            "FORECAST_BATCH_SIZE" => count(self.batch_size),
            "FORECAST_WINDOW_SIZE" => count(self.window_size),
            "FORECAST_CHANNELS" => self.channels.clone(),
            "FORECAST_POLICY" => self.policy.clone(),
            "FORECAST_ANCHOR_CHANNEL" => self.anchor_channel.clone(),
            "FORECAST_PAIR_CHANNELS" => self.pair_channels.clone(),
            "FORECAST_STEPS" => count(self.steps),
            "FORECAST_MODEL_PATH" => self.model_path.clone(),
            "FORECAST_SCALER_PATH" => self.scaler_path.clone(),
            "FORECAST_PREDICT_TIMEOUT_MS" => number(self.predict_timeout_ms),
            _ => None,
        }
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    }
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "setup config not found; using env defaults");
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source_url: String,
    pub http_bind: SocketAddr,
    pub poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub batch_size: usize,
    pub window_size: usize,
    pub channels: Vec<Channel>,
    pub policy: PolicyKind,
    pub steps: usize,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub predict_timeout_ms: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let overrides = setup_config_path().and_then(|path| load_setup_config_overrides(&path));
        Self::from_lookup(|key| env::var(key).ok(), overrides.as_ref())
    }

    /// Builds the config from `lookup` (normally the process environment), falling back
    /// to `overrides` for unset keys and then to defaults.
    pub fn from_lookup<F>(lookup: F, overrides: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| overrides.and_then(|ov| ov.get(key)))
        };
        let number = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };
        let count = |key: &str, default: usize| {
            get(key)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(default)
        };

        let source_url = get("FORECAST_SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.into());
        let http_bind = get("FORECAST_HTTP_BIND")
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.into())
            .parse::<SocketAddr>()
            .context("FORECAST_HTTP_BIND must be a socket address")?;

        let batch_size = count("FORECAST_BATCH_SIZE", 15);
        let window_size = count("FORECAST_WINDOW_SIZE", batch_size.saturating_mul(2));
        let steps = count("FORECAST_STEPS", 1);

        let channels = parse_channels(
            &get("FORECAST_CHANNELS").unwrap_or_else(|| DEFAULT_CHANNELS.into()),
        )?;
        let policy = parse_policy(
            get("FORECAST_POLICY").as_deref().unwrap_or("double_buffer"),
            &channels,
            get("FORECAST_ANCHOR_CHANNEL").as_deref(),
            get("FORECAST_PAIR_CHANNELS").as_deref(),
        )?;

        let config = Self {
            source_url,
            http_bind,
            poll_interval_ms: number("FORECAST_POLL_INTERVAL_MS", 60_000),
            retry_backoff_ms: number("FORECAST_RETRY_BACKOFF_MS", 5_000),
            request_timeout_ms: number("FORECAST_REQUEST_TIMEOUT_MS", 10_000),
            batch_size,
            window_size,
            channels,
            policy,
            steps,
            model_path: PathBuf::from(
                get("FORECAST_MODEL_PATH").unwrap_or_else(|| "models/model.json".into()),
            ),
            scaler_path: PathBuf::from(
                get("FORECAST_SCALER_PATH").unwrap_or_else(|| "models/scaler.json".into()),
            ),
            predict_timeout_ms: number("FORECAST_PREDICT_TIMEOUT_MS", 5_000),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("FORECAST_BATCH_SIZE must be positive");
        }
        if self.window_size != self.batch_size * 2 {
            bail!(
                "FORECAST_WINDOW_SIZE ({}) must be twice FORECAST_BATCH_SIZE ({})",
                self.window_size,
                self.batch_size
            );
        }
        if self.steps == 0 {
            bail!("FORECAST_STEPS must be at least 1");
        }
        for (key, value) in [
            ("FORECAST_POLL_INTERVAL_MS", self.poll_interval_ms),
            ("FORECAST_RETRY_BACKOFF_MS", self.retry_backoff_ms),
            ("FORECAST_REQUEST_TIMEOUT_MS", self.request_timeout_ms),
            ("FORECAST_PREDICT_TIMEOUT_MS", self.predict_timeout_ms),
        ] {
            if value == 0 {
                bail!("{key} must be positive");
            }
        }
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }
}

/// `key=name` entries separated by commas; a bare `key` publishes under its own name.
fn parse_channels(raw: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    let mut names = HashSet::new();
    let mut keys = HashSet::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let channel = match entry.split_once('=') {
            Some((key, name)) => {
                let (key, name) = (key.trim(), name.trim());
                if key.is_empty() || name.is_empty() {
                    bail!("malformed channel entry {entry:?}");
                }
                Channel::new(key, name)
            }
            None => Channel::plain(entry),
        };
        if !keys.insert(channel.source_key.clone()) {
            bail!("channel source key {:?} listed twice", channel.source_key);
        }
        if !names.insert(channel.name.clone()) {
            bail!("channel name {:?} listed twice", channel.name);
        }
        channels.push(channel);
    }
    if channels.is_empty() {
        bail!("FORECAST_CHANNELS must name at least one channel");
    }
    Ok(channels)
}

fn resolve_channel(channels: &[Channel], reference: &str) -> Result<String> {
    channels
        .iter()
        .find(|channel| channel.matches(reference))
        .map(|channel| channel.name.clone())
        .with_context(|| format!("{reference:?} is not a configured channel"))
}

fn parse_policy(
    raw: &str,
    channels: &[Channel],
    anchor: Option<&str>,
    pair: Option<&str>,
) -> Result<PolicyKind> {
    match raw.to_ascii_lowercase().replace('-', "_").as_str() {
        "double_buffer" => Ok(PolicyKind::DoubleBuffer),
        "anchor" => {
            let anchor = match anchor {
                Some(reference) => resolve_channel(channels, reference)
                    .context("FORECAST_ANCHOR_CHANNEL")?,
                None => channels[0].name.clone(),
            };
            Ok(PolicyKind::Anchor { anchor })
        }
        "replace_and_pair" => {
            let (primary, partner) = match pair {
                Some(raw) => {
                    let refs: Vec<&str> = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .collect();
                    let [primary, partner] = refs.as_slice() else {
                        bail!("FORECAST_PAIR_CHANNELS must list exactly two channels");
                    };
                    (
                        resolve_channel(channels, primary).context("FORECAST_PAIR_CHANNELS")?,
                        resolve_channel(channels, partner).context("FORECAST_PAIR_CHANNELS")?,
                    )
                }
                None => match channels {
                    [first, second, ..] => (first.name.clone(), second.name.clone()),
                    _ => bail!("replace_and_pair needs at least two channels"),
                },
            };
            if primary == partner {
                bail!("FORECAST_PAIR_CHANNELS must name two distinct channels");
            }
            Ok(PolicyKind::ReplaceAndPair { primary, partner })
        }
        other => bail!("unknown FORECAST_POLICY {other:?}"),
    }
}
