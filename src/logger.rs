use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Client-side upload log. Every method has a no-op default.
pub trait Logger: Send + Sync {
    fn connected(&self, _server: &str) {}
    fn file_start(&self, _path: &Path, _size: u64) {}
    fn file_done(&self, _path: &Path, _bytes: u64, _ack: &str) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
    fn done(&self, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, level: &str, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {} {}", Utc::now().to_rfc3339(), level, s);
        }
    }
}

impl Logger for TextLogger {
    fn connected(&self, server: &str) {
        self.line("INFO", &format!("CONNECT server={}", server));
    }
    fn file_start(&self, path: &Path, size: u64) {
        self.line("INFO", &format!("SEND path={} size={}", path.display(), size));
    }
    fn file_done(&self, path: &Path, bytes: u64, ack: &str) {
        self.line(
            "INFO",
            &format!("SENT path={} bytes={} ack={:?}", path.display(), bytes, ack),
        );
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(
            "ERROR",
            &format!("ctx={} path={} msg={}", context, path.display(), msg),
        );
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.line("INFO", &format!("DONE files={files} bytes={bytes} seconds={seconds:.3}"));
    }
}
