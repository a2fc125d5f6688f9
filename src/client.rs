//! Blocking upload client

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::progress::ProgressObserver;
use crate::protocol::{FileHeader, ACK, SEND_CHUNK_SIZE};

/// What the server confirmed for one file
#[derive(Debug, Clone)]
pub struct Receipt {
    pub name: String,
    pub bytes: u64,
    pub ack: String,
    pub elapsed: Duration,
}

pub struct UploadClient {
    stream: TcpStream,
}

impl UploadClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).with_context(|| format!("connect {addr}"))?;
        let _ = stream.set_nodelay(true);
        Ok(Self { stream })
    }

    /// Send one file and wait for the server's acknowledgement.
    ///
    /// After an error the connection is out of sync with the server and should
    /// be dropped.
    pub fn send_file(
        &mut self,
        path: &Path,
        progress: &mut dyn ProgressObserver,
    ) -> Result<Receipt> {
        let started = Instant::now();
        let mut file =
            File::open(path).with_context(|| format!("open {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("no file name in {}", path.display()))?;

        let header = FileHeader::new(name.clone(), size).encode()?;
        self.stream.write_all(&header).context("send header")?;

        progress.start(size);
        let mut buf = vec![0u8; SEND_CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < size {
            let want = (size - sent).min(buf.len() as u64) as usize;
            let n = file
                .read(&mut buf[..want])
                .with_context(|| format!("read {}", path.display()))?;
            if n == 0 {
                progress.finish();
                anyhow::bail!(
                    "{} shrank while sending ({} of {} bytes)",
                    path.display(),
                    sent,
                    size
                );
            }
            self.stream.write_all(&buf[..n]).context("send body")?;
            sent += n as u64;
            progress.advance(sent);
        }
        progress.finish();

        let mut ack = vec![0u8; ACK.len()];
        self.stream
            .read_exact(&mut ack)
            .context("server closed the connection before acknowledging")?;
        if ack != ACK {
            anyhow::bail!(
                "unexpected acknowledgement: {:?}",
                String::from_utf8_lossy(&ack)
            );
        }

        Ok(Receipt {
            name,
            bytes: sent,
            ack: String::from_utf8_lossy(&ack).into_owned(),
            elapsed: started.elapsed(),
        })
    }
}
