//! Command-line options for the `fileupd` server and the `fileup` client

use clap::Parser;
use std::path::PathBuf;

/// Options for fileupd. Unset values fall back to the config file, then to defaults.
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "fileupd", version, about = "Receive uploaded files over the fileup framing protocol")]
pub struct ServerOpts {
    /// Bind address (host:port) [default: 0.0.0.0:8080]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory uploaded files are stored in [default: .]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Receive buffer per read, in KiB [default: 512]
    #[arg(long = "recv-buffer-kb")]
    pub recv_buffer_kb: Option<usize>,

    /// TOML config file with the same keys as the flags
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, fileup=trace); RUST_LOG wins when set
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Options for the fileup client
#[derive(Clone, Debug, Parser)]
#[command(name = "fileup", version, about = "Upload files to a fileupd server")]
pub struct ClientOpts {
    /// Files to upload, in order, over one connection
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Server address (host:port)
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    pub server: String,

    /// Append a plain-text log of each upload to this file
    #[arg(long = "log-file", default_value = "client.log")]
    pub log_file: PathBuf,

    /// Skip the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}
