//! Per-connection upload state machine
//!
//! An `UploadTask` owns one connection. Each `step` performs a single read and
//! pushes the bytes through header reassembly and into the output file. A
//! finished file is acknowledged and the task resets, so the same connection
//! can carry any number of sequential uploads.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::{
    random_token, sanitize_name, stored_name, FileHeader, HeaderAssembler, ProtocolError, ACK,
    RECV_BUFFER_SIZE,
};
use crate::task::{ConnId, Readiness, Task};

// Fresh tokens tried when a generated name already exists
const NAME_ATTEMPTS: usize = 5;

thread_local! {
    // One receive buffer per worker thread instead of one per connection
    static RECV_BUF: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Directory stored files are created in
    pub storage: PathBuf,
    /// Upper bound on bytes taken by one read
    pub recv_buffer_size: usize,
}

impl UploadSettings {
    pub fn new(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("peer closed the connection mid-transfer")]
    PeerClosed,
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("create {}: {source}", .path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("send acknowledgement: {0}")]
    Ack(#[source] io::Error),
}

/// Outcome of one `step`
#[derive(Debug)]
pub enum Step {
    /// Nothing to read yet; state untouched
    Retry,
    /// Bytes consumed, current file still incomplete
    Continue,
    /// Files finished and acknowledged during this step
    Completed(Vec<PathBuf>),
    /// Peer closed between files
    Closed,
    /// Transfer abandoned and connection closed
    Failed(TransferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    ReceivingBody,
}

struct Output {
    file: File,
    path: PathBuf,
    size: u64,
    written: u64,
}

impl Output {
    fn create(dir: &Path, header: &FileHeader) -> Result<Self, TransferError> {
        let name = sanitize_name(&header.name)?;
        let mut rng = rand::thread_rng();
        let mut attempt = 1;
        loop {
            let stored = stored_name(name, &random_token(&mut rng));
            let path = dir.join(OsStr::from_bytes(&stored));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        file,
                        path,
                        size: header.size,
                        written: 0,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(source) => return Err(TransferError::Create { path, source }),
            }
        }
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.written)
    }

    fn is_complete(&self) -> bool {
        self.written >= self.size
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file
            .write_all(data)
            .map_err(|source| TransferError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.written += data.len() as u64;
        Ok(())
    }
}

struct Transfer<C> {
    conn: C,
    header: HeaderAssembler,
    // Header length once parsed; 0 while awaiting the header
    header_len: u64,
    output: Option<Output>,
    // Bytes received for the current file, header included
    received: u64,
    closed: bool,
}

impl<C: Read + Write> Transfer<C> {
    fn reset(&mut self) {
        self.header.reset();
        self.header_len = 0;
        self.received = 0;
    }

    fn mid_transfer(&self) -> bool {
        self.output.is_some() || self.header.buffered() > 0
    }

    fn consume(
        &mut self,
        id: ConnId,
        storage: &Path,
        mut data: &[u8],
    ) -> Result<Vec<PathBuf>, TransferError> {
        let mut completed = Vec::new();
        while !data.is_empty() {
            match self.output.as_mut() {
                None => {
                    let Some((header, used)) = self.header.feed(data)? else {
                        self.received += data.len() as u64;
                        break;
                    };
                    self.received += used as u64;
                    self.header_len = self.received;
                    data = &data[used..];
                    let output = Output::create(storage, &header)?;
                    info!(
                        conn = id,
                        name = %header.display_name(),
                        size = header.size,
                        file = %output.path.display(),
                        "receiving file"
                    );
                    self.output = Some(output);
                }
                Some(out) => {
                    let take = out.remaining().min(data.len() as u64) as usize;
                    out.write(&data[..take])?;
                    self.received += take as u64;
                    data = &data[take..];
                }
            }
            if let Some(path) = self.finish_if_complete(id)? {
                completed.push(path);
            }
        }
        Ok(completed)
    }

    fn finish_if_complete(&mut self, id: ConnId) -> Result<Option<PathBuf>, TransferError> {
        let out = match self.output.take() {
            Some(out) if out.is_complete() => out,
            other => {
                self.output = other;
                return Ok(None);
            }
        };
        let Output {
            file, path, size, ..
        } = out;
        drop(file);
        info!(conn = id, file = %path.display(), size, "file complete");
        self.reset();
        match self.conn.write_all(ACK) {
            Ok(()) => {}
            // Peer is not draining acknowledgements; the file itself is stored
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(conn = id, file = %path.display(), "send buffer full, acknowledgement dropped");
            }
            Err(e) => return Err(TransferError::Ack(e)),
        }
        Ok(Some(path))
    }

    /// Drop per-file state; a partially written file is removed
    fn fail(&mut self, id: ConnId) {
        self.reset();
        if let Some(Output { file, path, .. }) = self.output.take() {
            error!(conn = id, file = %path.display(), "upload failed, discarding partial file");
            drop(file);
            match fs::remove_file(&path) {
                Ok(()) => info!(conn = id, file = %path.display(), "partial file deleted"),
                Err(e) => error!(conn = id, file = %path.display(), error = %e, "delete partial file failed"),
            }
        }
    }

    fn abort(&mut self, id: ConnId, err: TransferError) -> Step {
        warn!(conn = id, error = %err, "closing connection");
        self.fail(id);
        self.closed = true;
        Step::Failed(err)
    }
}

pub struct UploadTask<C> {
    id: ConnId,
    settings: Arc<UploadSettings>,
    readiness: Arc<dyn Readiness>,
    inner: Mutex<Transfer<C>>,
}

impl<C: Read + Write> UploadTask<C> {
    pub fn new(
        id: ConnId,
        conn: C,
        settings: Arc<UploadSettings>,
        readiness: Arc<dyn Readiness>,
    ) -> Self {
        Self {
            id,
            settings,
            readiness,
            inner: Mutex::new(Transfer {
                conn,
                header: HeaderAssembler::new(),
                header_len: 0,
                output: None,
                received: 0,
                closed: false,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn phase(&self) -> Phase {
        if self.inner.lock().output.is_some() {
            Phase::ReceivingBody
        } else {
            Phase::AwaitingHeader
        }
    }

    /// Bytes received for the file in progress, header included
    pub fn received(&self) -> u64 {
        self.inner.lock().received
    }

    /// Parsed header length of the file in progress; 0 before the header is complete
    pub fn header_len(&self) -> u64 {
        self.inner.lock().header_len
    }

    /// Where the file in progress is being written
    pub fn output_path(&self) -> Option<PathBuf> {
        self.inner.lock().output.as_ref().map(|o| o.path.clone())
    }

    /// Perform one read and advance the transfer with whatever it returned
    pub fn step(&self) -> Step {
        let mut t = self.inner.lock();
        if t.closed {
            return Step::Closed;
        }
        let size = self.settings.recv_buffer_size.max(1);
        RECV_BUF.with(|cell| {
            let mut buf = cell.borrow_mut();
            if buf.len() < size {
                buf.resize(size, 0);
            }
            let buf = &mut buf[..size];
            match t.conn.read(buf) {
                Ok(0) if t.mid_transfer() => t.abort(self.id, TransferError::PeerClosed),
                Ok(0) => {
                    debug!(conn = self.id, "socket closed by peer");
                    t.closed = true;
                    Step::Closed
                }
                Ok(n) => {
                    debug!(conn = self.id, bytes = n, "recv");
                    match t.consume(self.id, &self.settings.storage, &buf[..n]) {
                        Ok(done) if done.is_empty() => Step::Continue,
                        Ok(done) => Step::Completed(done),
                        Err(e) => t.abort(self.id, e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!(conn = self.id, "socket recv would block");
                    Step::Retry
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!(conn = self.id, "socket recv interrupted");
                    Step::Retry
                }
                Err(e) => t.abort(self.id, TransferError::Read(e)),
            }
        })
    }
}

impl<C: Read + Write + Send> Task for UploadTask<C> {
    fn id(&self) -> ConnId {
        self.id
    }

    fn run(&self) {
        self.step();
    }

    fn abandon(&self) {
        let mut t = self.inner.lock();
        if !t.closed {
            warn!(conn = self.id, "abandoning connection");
            t.fail(self.id);
            t.closed = true;
        }
    }

    fn destroy(&self) {
        if self.is_closed() {
            debug!(conn = self.id, "upload task released");
            self.readiness.release(self.id);
        } else {
            self.readiness.rearm(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Connection that replays scripted reads and records what was sent back
    struct Script {
        reads: VecDeque<io::Result<Vec<u8>>>,
        sent: Arc<Mutex<Vec<u8>>>,
        write_error: Option<io::ErrorKind>,
    }

    impl Script {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    reads: VecDeque::new(),
                    sent: Arc::clone(&sent),
                    write_error: None,
                },
                sent,
            )
        }

        fn data(mut self, bytes: &[u8]) -> Self {
            self.reads.push_back(Ok(bytes.to_vec()));
            self
        }

        fn error(mut self, kind: io::ErrorKind) -> Self {
            self.reads.push_back(Err(io::Error::from(kind)));
            self
        }

        fn eof(self) -> Self {
            self.data(&[])
        }

        fn refuse_writes(mut self, kind: io::ErrorKind) -> Self {
            self.write_error = Some(kind);
            self
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(mut chunk)) => {
                    if chunk.len() > buf.len() {
                        let rest = chunk.split_off(buf.len());
                        self.reads.push_front(Ok(rest));
                    }
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(kind.into());
            }
            self.sent.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ConnId, &'static str)>>,
    }

    impl Readiness for Recorder {
        fn rearm(&self, id: ConnId) {
            self.events.lock().push((id, "rearm"));
        }
        fn release(&self, id: ConnId) {
            self.events.lock().push((id, "release"));
        }
    }

    fn wire(name: impl Into<Vec<u8>>, body: &[u8]) -> Vec<u8> {
        let mut bytes = FileHeader::new(name, body.len() as u64).encode().unwrap();
        bytes.extend_from_slice(body);
        bytes
    }

    fn stored(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    fn looks_like(path: &Path, stem: &str, ext: &str) -> bool {
        let name = path.file_name().unwrap().to_str().unwrap();
        let Some(rest) = name.strip_prefix(&format!("{stem}-")) else {
            return false;
        };
        let Some(token) = rest.strip_suffix(ext) else {
            return false;
        };
        token.len() == 8 && token.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn task(
        dir: &Path,
        conn: Script,
        buf: usize,
    ) -> (UploadTask<Script>, Arc<Recorder>) {
        let readiness = Arc::new(Recorder::default());
        let settings = Arc::new(UploadSettings {
            storage: dir.to_path_buf(),
            recv_buffer_size: buf,
        });
        (
            UploadTask::new(1, conn, settings, readiness.clone()),
            readiness,
        )
    }

    fn run_until_done(task: &UploadTask<Script>) -> Vec<PathBuf> {
        let mut done = Vec::new();
        for _ in 0..10_000 {
            match task.step() {
                Step::Completed(paths) => done.extend(paths),
                Step::Continue => {}
                Step::Retry => return done,
                other => panic!("unexpected step: {other:?}"),
            }
        }
        done
    }

    #[test]
    fn hello_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, sent) = Script::new();
        let (task, readiness) = task(dir.path(), conn.data(&wire("a.txt", b"hello")), 4096);

        let Step::Completed(paths) = task.step() else {
            panic!("expected completion");
        };
        assert_eq!(paths.len(), 1);
        assert!(looks_like(&paths[0], "a", ".txt"));
        assert_eq!(fs::read(&paths[0]).unwrap(), b"hello");
        assert_eq!(*sent.lock(), ACK);

        // Reset for the next file on the same connection
        assert_eq!(task.phase(), Phase::AwaitingHeader);
        assert_eq!(task.received(), 0);
        assert_eq!(task.header_len(), 0);
        assert!(!task.is_closed());

        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "rearm")]);
    }

    #[test]
    fn header_and_body_split_across_tiny_reads() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (conn, sent) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&wire("blob.bin", &body)), 3);

        assert!(matches!(task.step(), Step::Continue));
        assert_eq!(task.phase(), Phase::AwaitingHeader);
        assert_eq!(task.received(), 3);

        let done = run_until_done(&task);
        assert_eq!(done.len(), 1);
        assert_eq!(fs::read(&done[0]).unwrap(), body);
        assert_eq!(*sent.lock(), ACK);
    }

    #[test]
    fn header_length_tracked_while_receiving_body() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("a.txt", b"hello");
        let (conn, _) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&bytes[..24]), 4096);

        assert!(matches!(task.step(), Step::Continue));
        assert_eq!(task.phase(), Phase::ReceivingBody);
        assert_eq!(task.header_len(), 22);
        assert_eq!(task.received(), 24);
        assert!(task.output_path().is_some());
    }

    #[test]
    fn peer_close_mid_body_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("movie.mkv", &[7u8; 1000]);
        let (conn, sent) = Script::new();
        let (task, readiness) = task(dir.path(), conn.data(&bytes[..400]).eof(), 4096);

        assert!(matches!(task.step(), Step::Continue));
        let partial = task.output_path().unwrap();
        assert!(partial.exists());

        assert!(matches!(task.step(), Step::Failed(TransferError::PeerClosed)));
        assert!(!partial.exists());
        assert!(stored(dir.path()).is_empty());
        assert!(task.is_closed());
        assert!(sent.lock().is_empty());

        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "release")]);
    }

    #[test]
    fn second_file_on_same_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, sent) = Script::new();
        let conn = conn
            .data(&wire("one.txt", b"first"))
            .data(&wire("two.txt", b"second file"));
        let (task, _) = task(dir.path(), conn, 4096);

        assert!(matches!(task.step(), Step::Completed(_)));
        let Step::Completed(paths) = task.step() else {
            panic!("second file not completed");
        };
        assert!(looks_like(&paths[0], "two", ".txt"));
        assert_eq!(fs::read(&paths[0]).unwrap(), b"second file");
        assert_eq!(stored(dir.path()).len(), 2);
        assert_eq!(sent.lock().len(), 2 * ACK.len());
    }

    #[test]
    fn back_to_back_files_in_one_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = wire("x.log", b"abc");
        bytes.extend(wire("y.log", b"defg"));
        let (conn, _) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&bytes), 4096);

        let Step::Completed(paths) = task.step() else {
            panic!("expected completion");
        };
        assert_eq!(paths.len(), 2);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"abc");
        assert_eq!(fs::read(&paths[1]).unwrap(), b"defg");
    }

    #[test]
    fn missing_separator_closes_without_creating_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = wire("a.txt", b"hello");
        bytes[13] = b'#';
        let (conn, sent) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&bytes), 4096);

        assert!(matches!(
            task.step(),
            Step::Failed(TransferError::Protocol(ProtocolError::MissingSeparator))
        ));
        assert!(task.is_closed());
        assert!(stored(dir.path()).is_empty());
        assert!(sent.lock().is_empty());
        // Closed tasks do not read again
        assert!(matches!(task.step(), Step::Closed));
    }

    #[test]
    fn transient_read_errors_leave_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("a.txt", b"hello");
        let (conn, _) = Script::new();
        let conn = conn
            .data(&bytes[..10])
            .error(io::ErrorKind::WouldBlock)
            .error(io::ErrorKind::Interrupted)
            .data(&bytes[10..]);
        let (task, _) = task(dir.path(), conn, 4096);

        assert!(matches!(task.step(), Step::Continue));
        assert!(matches!(task.step(), Step::Retry));
        assert!(matches!(task.step(), Step::Retry));
        assert_eq!(task.received(), 10);
        assert!(!task.is_closed());
        assert!(matches!(task.step(), Step::Completed(_)));
    }

    #[test]
    fn hard_read_error_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("a.txt", b"hello");
        let (conn, _) = Script::new();
        let conn = conn
            .data(&bytes[..23])
            .error(io::ErrorKind::ConnectionReset);
        let (task, _) = task(dir.path(), conn, 4096);

        assert!(matches!(task.step(), Step::Continue));
        assert!(matches!(task.step(), Step::Failed(TransferError::Read(_))));
        assert!(task.is_closed());
        assert!(stored(dir.path()).is_empty());
    }

    #[test]
    fn empty_file_is_stored_and_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, sent) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&wire("empty", b"")), 4096);

        let Step::Completed(paths) = task.step() else {
            panic!("expected completion");
        };
        assert!(looks_like(&paths[0], "empty", ""));
        assert_eq!(fs::metadata(&paths[0]).unwrap().len(), 0);
        assert_eq!(*sent.lock(), ACK);
    }

    #[test]
    fn clean_close_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _) = Script::new();
        let (task, readiness) = task(dir.path(), conn.data(&wire("a.txt", b"hi")).eof(), 4096);

        assert!(matches!(task.step(), Step::Completed(_)));
        assert!(matches!(task.step(), Step::Closed));
        assert!(task.is_closed());
        assert_eq!(stored(dir.path()).len(), 1);
        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "release")]);
    }

    #[test]
    fn directories_in_name_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&wire("../../etc/x.conf", b"k=v")), 4096);

        let Step::Completed(paths) = task.step() else {
            panic!("expected completion");
        };
        assert_eq!(paths[0].parent().unwrap(), dir.path());
        assert!(looks_like(&paths[0], "x", ".conf"));
    }

    #[test]
    fn non_utf8_name_is_stored_byte_for_byte() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let (conn, _) = Script::new();
        let (task, _) = task(dir.path(), conn.data(&wire(b"caf\xe9.txt".to_vec(), b"ok")), 4096);

        let Step::Completed(paths) = task.step() else {
            panic!("expected completion");
        };
        let name = paths[0].file_name().unwrap().as_bytes();
        assert!(name.starts_with(b"caf\xe9-"));
        assert!(name.ends_with(b".txt"));
        assert_eq!(name.len(), b"caf\xe9-".len() + 8 + b".txt".len());
        assert_eq!(fs::read(&paths[0]).unwrap(), b"ok");
    }

    #[test]
    fn abandon_discards_partial_file_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("dump.bin", &[1u8; 500]);
        let (conn, _) = Script::new();
        let (task, readiness) = task(dir.path(), conn.data(&bytes[..100]), 4096);

        assert!(matches!(task.step(), Step::Continue));
        let partial = task.output_path().unwrap();
        task.abandon();
        assert!(task.is_closed());
        assert!(!partial.exists());
        assert!(task.output_path().is_none());

        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "release")]);
    }

    #[test]
    fn failed_cleanup_delete_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wire("gone.txt", &[3u8; 300]);
        let (conn, _) = Script::new();
        let (task, readiness) = task(dir.path(), conn.data(&bytes[..50]).eof(), 4096);

        assert!(matches!(task.step(), Step::Continue));
        // Someone else removed the partial file first
        fs::remove_file(task.output_path().unwrap()).unwrap();

        assert!(matches!(task.step(), Step::Failed(TransferError::PeerClosed)));
        assert!(task.is_closed());
        assert!(stored(dir.path()).is_empty());
        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "release")]);
    }

    #[test]
    fn full_send_buffer_drops_ack_but_keeps_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, sent) = Script::new();
        let conn = conn
            .data(&wire("a.txt", b"one"))
            .data(&wire("b.txt", b"two"))
            .refuse_writes(io::ErrorKind::WouldBlock);
        let (task, readiness) = task(dir.path(), conn, 4096);

        assert!(matches!(task.step(), Step::Completed(_)));
        assert!(!task.is_closed());
        assert!(matches!(task.step(), Step::Completed(_)));
        assert_eq!(stored(dir.path()).len(), 2);
        assert!(sent.lock().is_empty());

        task.destroy();
        assert_eq!(*readiness.events.lock(), vec![(1, "rearm")]);
    }

    #[test]
    fn ack_failure_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, _) = Script::new();
        let conn = conn
            .data(&wire("a.txt", b"one"))
            .refuse_writes(io::ErrorKind::BrokenPipe);
        let (task, _) = task(dir.path(), conn, 4096);

        assert!(matches!(task.step(), Step::Failed(TransferError::Ack(_))));
        assert!(task.is_closed());
        // The body was complete before the acknowledgement failed
        assert_eq!(stored(dir.path()).len(), 1);
    }
}
