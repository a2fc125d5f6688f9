//! Readiness reactor built on `mio`
//!
//! Accepts connections, creates one `UploadTask` per connection and hands a
//! task to the dispatcher whenever its socket turns readable. A socket is
//! deregistered as soon as it fires and only registered again from the task's
//! `destroy`, so a connection never has two steps in flight.

use anyhow::{Context, Result};
use mio::net::{TcpListener, TcpStream};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::dispatcher::TaskDispatcher;
use crate::registry::TaskRegistry;
use crate::task::{ConnId, Readiness, TaskRef};
use crate::upload::{UploadSettings, UploadTask};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONN: ConnId = 2;

/// Re-arms and releases connections on behalf of tasks running on workers
struct Rearm {
    registry: Registry,
    tasks: Weak<TaskRegistry>,
}

impl Readiness for Rearm {
    fn rearm(&self, id: ConnId) {
        let Some(tasks) = self.tasks.upgrade() else {
            return;
        };
        let Some(fd) = tasks.fd(id) else {
            return;
        };
        if let Err(e) = self
            .registry
            .register(&mut SourceFd(&fd), Token(id), Interest::READABLE)
        {
            warn!(conn = id, error = %e, "re-arm failed, dropping connection");
            tasks.remove(id);
        }
    }

    fn release(&self, id: ConnId) {
        if let Some(tasks) = self.tasks.upgrade() {
            if tasks.remove(id).is_some() {
                debug!(conn = id, open = tasks.len(), "connection released");
            }
        }
    }
}

/// Stops a running reactor from any thread
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }
}

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    tasks: Arc<TaskRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    settings: Arc<UploadSettings>,
    rearm: Arc<Rearm>,
    shutdown: Shutdown,
    next_id: ConnId,
}

impl Reactor {
    pub fn bind(
        addr: &str,
        dispatcher: Arc<TaskDispatcher>,
        settings: Arc<UploadSettings>,
    ) -> Result<Self> {
        let sock_addr = addr
            .to_socket_addrs()
            .with_context(|| format!("resolve {addr}"))?
            .next()
            .with_context(|| format!("no address for {addr}"))?;

        let poll = Poll::new().context("create poll")?;
        let mut listener =
            TcpListener::bind(sock_addr).with_context(|| format!("bind {sock_addr}"))?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("register listener")?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER).context("create waker")?);
        let tasks = Arc::new(TaskRegistry::new());
        let rearm = Arc::new(Rearm {
            registry: poll.registry().try_clone().context("clone registry")?,
            tasks: Arc::downgrade(&tasks),
        });

        Ok(Self {
            poll,
            listener,
            tasks,
            dispatcher,
            settings,
            rearm,
            shutdown: Shutdown {
                flag: Arc::new(AtomicBool::new(false)),
                waker,
            },
            next_id: FIRST_CONN,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener address")
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Connections currently registered
    pub fn connections(&self) -> usize {
        self.tasks.len()
    }

    /// Poll until `Shutdown::trigger` is called
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        while !self.shutdown.flag.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("poll");
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {}
                    Token(id) => self.ready(id),
                }
            }
        }
        info!(open = self.tasks.len(), "reactor stopped");
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.open(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn open(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }
        let id = self.next_id;
        self.next_id += 1;
        let fd = stream.as_raw_fd();
        let readiness: Arc<dyn Readiness> = self.rearm.clone();
        let task: TaskRef = Arc::new(UploadTask::new(
            id,
            stream,
            Arc::clone(&self.settings),
            readiness,
        ));
        self.tasks.insert(id, task, fd);
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), Token(id), Interest::READABLE)
        {
            warn!(conn = id, error = %e, "register connection failed");
            self.tasks.remove(id);
            return;
        }
        info!(conn = id, %peer, "connection accepted");
    }

    fn ready(&mut self, id: ConnId) {
        let Some(slot) = self.tasks.slot(id) else {
            debug!(conn = id, "event for released connection");
            return;
        };
        // Stop watching until the step has run; the task re-arms from `destroy`
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&slot.fd)) {
            warn!(conn = id, error = %e, "deregister failed");
        }
        self.dispatcher.assign(slot.task);
    }
}
