//! fileup - upload files to a fileupd server
//!
//! Files are sent in order over one connection. A failed file drops the
//! connection and the next file starts on a fresh one.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use fileup::cli::ClientOpts;
use fileup::client::UploadClient;
use fileup::logger::{Logger, NoopLogger, TextLogger};
use fileup::progress::{print_failure, print_success, NoProgress, ProgressObserver, UploadProgress};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = ClientOpts::parse();

    let logger: Arc<dyn Logger> = match TextLogger::new(&opts.log_file) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!(
                "warning: cannot open log file {}: {}",
                opts.log_file.display(),
                e
            );
            Arc::new(NoopLogger)
        }
    };

    let start = Instant::now();
    let mut client: Option<UploadClient> = None;
    let mut sent_files = 0u64;
    let mut sent_bytes = 0u64;
    let mut failed = 0usize;

    for path in &opts.files {
        let display = display_name(path);

        if client.is_none() {
            match UploadClient::connect(&opts.server) {
                Ok(c) => {
                    logger.connected(&opts.server);
                    client = Some(c);
                }
                Err(e) => {
                    logger.error("connect", path, &format!("{e:#}"));
                    print_failure(&display, &format!("{e:#}"));
                    failed += 1;
                    continue;
                }
            }
        }
        let Some(conn) = client.as_mut() else {
            continue;
        };

        if let Ok(meta) = std::fs::metadata(path) {
            logger.file_start(path, meta.len());
        }

        let mut progress: Box<dyn ProgressObserver> = if opts.no_progress {
            Box::new(NoProgress)
        } else {
            Box::new(UploadProgress::new())
        };

        match conn.send_file(path, progress.as_mut()) {
            Ok(receipt) => {
                drop(progress);
                logger.file_done(path, receipt.bytes, &receipt.ack);
                print_success(
                    &receipt.name,
                    receipt.bytes,
                    receipt.elapsed.as_secs_f64(),
                    &receipt.ack,
                );
                sent_files += 1;
                sent_bytes += receipt.bytes;
            }
            Err(e) => {
                drop(progress);
                logger.error("send", path, &format!("{e:#}"));
                print_failure(&display, &format!("{e:#}"));
                failed += 1;
                // The stream is out of step with the server now
                client = None;
            }
        }
    }

    logger.done(sent_files, sent_bytes, start.elapsed().as_secs_f64());

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, opts.files.len());
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
