//! Server configuration: defaults, optional TOML file, command-line overrides

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::ServerOpts;
use crate::protocol::RECV_BUFFER_SIZE;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_LOG_FILTER: &str = "fileup=info";

/// Keys accepted in the TOML file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub recv_buffer_kb: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }
}

/// Fully resolved server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Canonical storage directory
    pub root: PathBuf,
    pub workers: usize,
    pub recv_buffer_size: usize,
    pub log_filter: String,
}

impl ServerConfig {
    /// Resolve flags, then the config file named by `--config`, then defaults
    pub fn load(opts: &ServerOpts) -> Result<Self> {
        let file = match opts.config {
            Some(ref path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(opts, file)
    }

    pub fn merge(opts: &ServerOpts, file: FileConfig) -> Result<Self> {
        let root = opts
            .root
            .clone()
            .or(file.root)
            .unwrap_or_else(|| PathBuf::from("."));
        if !root.exists() {
            anyhow::bail!("storage root does not exist: {}", root.display());
        }
        if !root.is_dir() {
            anyhow::bail!("storage root is not a directory: {}", root.display());
        }
        let root = std::fs::canonicalize(&root)
            .with_context(|| format!("canonicalize storage root {}", root.display()))?;

        let workers = match opts.workers.or(file.workers).unwrap_or(0) {
            0 => num_cpus::get().max(1),
            n => n,
        };

        let recv_buffer_size = match opts.recv_buffer_kb.or(file.recv_buffer_kb) {
            Some(0) => anyhow::bail!("receive buffer must be at least 1 KiB"),
            Some(kb) => kb
                .checked_mul(1024)
                .with_context(|| format!("receive buffer of {kb} KiB is too large"))?,
            None => RECV_BUFFER_SIZE,
        };

        Ok(Self {
            bind: opts
                .bind
                .clone()
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            root,
            workers,
            recv_buffer_size,
            log_filter: opts
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}
