//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Node configuration. File: ~/.config/sharecode/config.toml or /etc/sharecode/config.toml.
/// Env overrides: SHARECODE_HTTP_PORT, SHARECODE_BIND_HOST, SHARECODE_UPLOAD_DIR,
/// SHARECODE_OFFER_TTL_SECS, SHARECODE_MAX_LISTENERS, SHARECODE_LOG_LEVEL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP endpoint port (default 8080).
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Address the HTTP endpoint and transfer listeners bind to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Address the download bridge dials.
    #[serde(default = "default_bridge_host")]
    pub bridge_host: String,
    /// Lowest share code handed out.
    #[serde(default = "default_code_min")]
    pub code_min: u16,
    /// Highest share code handed out.
    #[serde(default = "default_code_max")]
    pub code_max: u16,
    /// Upload root; created at startup, never removed by the node.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Concurrent HTTP requests being handled.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Outstanding one-shot listeners.
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
    /// Seconds an undownloaded offer stays reachable.
    #[serde(default = "default_offer_ttl_secs")]
    pub offer_ttl_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Filter directive for tracing (e.g. "info", "sharecode_node=debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_http_port() -> u16 {
    8080
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_bridge_host() -> String {
    "127.0.0.1".to_string()
}
fn default_code_min() -> u16 {
    *sharecode_core::DEFAULT_CODE_RANGE.start()
}
fn default_code_max() -> u16 {
    *sharecode_core::DEFAULT_CODE_RANGE.end()
}
fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("p2p-upload")
}
fn default_max_workers() -> usize {
    10
}
fn default_max_listeners() -> usize {
    256
}
fn default_offer_ttl_secs() -> u64 {
    600
}
fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_host: default_bind_host(),
            bridge_host: default_bridge_host(),
            code_min: default_code_min(),
            code_max: default_code_max(),
            upload_dir: default_upload_dir(),
            max_workers: default_max_workers(),
            max_listeners: default_max_listeners(),
            offer_ttl_secs: default_offer_ttl_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.code_min <= self.code_max,
            "code_min ({}) must not exceed code_max ({})",
            self.code_min,
            self.code_max
        );
        anyhow::ensure!(self.code_min > 0, "code_min must be a usable port");
        anyhow::ensure!(self.max_workers > 0, "max_workers must be at least 1");
        anyhow::ensure!(self.max_listeners > 0, "max_listeners must be at least 1");
        anyhow::ensure!(self.offer_ttl_secs > 0, "offer_ttl_secs must be at least 1");
        Ok(())
    }
}

/// Load config: merge default, then config file (explicit or first found), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_file()?.unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.validate()?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("SHARECODE_HTTP_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.http_port = p;
    }
    if let Some(h) = var("SHARECODE_BIND_HOST") {
        c.bind_host = h;
    }
    if let Some(d) = var("SHARECODE_UPLOAD_DIR") {
        c.upload_dir = PathBuf::from(d);
    }
    if let Some(t) = var("SHARECODE_OFFER_TTL_SECS").and_then(|s| s.parse::<u64>().ok()) {
        c.offer_ttl_secs = t;
    }
    if let Some(n) = var("SHARECODE_MAX_LISTENERS").and_then(|s| s.parse::<usize>().ok()) {
        c.max_listeners = n;
    }
    if let Some(l) = var("SHARECODE_LOG_LEVEL") {
        c.log_level = l;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sharecode/config.toml"));
    }
    out.push(PathBuf::from("/etc/sharecode/config.toml"));
    out
}

fn load_file() -> anyhow::Result<Option<Config>> {
    match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => read_file(&p).map(Some),
        None => Ok(None),
    }
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("parsing config {}", path.display()))
}
