//! Upload progress display
//!
//! Draws `[=====>      ] 42%  3.10 MiB/s` in place while a file is sent,
//! then a coloured one-line result per file.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const BAR_WIDTH: usize = 50;

/// Receives byte counts while a file body is being sent
pub trait ProgressObserver {
    fn start(&mut self, _total: u64) {}
    fn advance(&mut self, _sent: u64) {}
    fn finish(&mut self) {}
}

/// Observer that draws nothing
pub struct NoProgress;
impl ProgressObserver for NoProgress {}

pub struct UploadProgress {
    bar: Option<ProgressBar>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self { bar: None }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(&format!(
                "[{{bar:{BAR_WIDTH}}}] {{percent}}%  {{binary_bytes_per_sec}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for UploadProgress {
    fn start(&mut self, total: u64) {
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout());
        bar.set_style(Self::style());
        bar.enable_steady_tick(Duration::from_millis(250));
        self.bar = Some(bar);
    }

    fn advance(&mut self, sent: u64) {
        if let Some(ref bar) = self.bar {
            bar.set_position(sent);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

impl Drop for UploadProgress {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

/// `Uploaded a.txt (5 B) in 0.0s (0.1 MB/s) - recv file complete!`
pub fn print_success(name: &str, bytes: u64, seconds: f64, ack: &str) {
    let throughput = if seconds > 0.0 {
        bytes as f64 / seconds / 1_048_576.0
    } else {
        0.0
    };
    println!(
        "{} {} ({} B) in {:.1}s ({:.1} MB/s) - {}",
        "Uploaded".with(Color::Green).bold(),
        name,
        bytes,
        seconds,
        throughput,
        ack.trim_end()
    );
}

pub fn print_failure(name: &str, msg: &str) {
    eprintln!("{} {}: {}", "Failed".with(Color::Red).bold(), name, msg);
}
