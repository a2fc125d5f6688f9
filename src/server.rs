//! Wires the worker pool, the dispatcher and the reactor into a running server

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatcher::TaskDispatcher;
use crate::reactor::{Reactor, Shutdown};
use crate::upload::UploadSettings;

pub struct Server {
    reactor: Reactor,
    dispatcher: Arc<TaskDispatcher>,
}

impl Server {
    /// Start the workers and bind the listener; nothing is accepted until `run`
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let dispatcher = TaskDispatcher::init(config.workers)?;
        let settings = Arc::new(UploadSettings {
            storage: config.root.clone(),
            recv_buffer_size: config.recv_buffer_size,
        });
        let reactor = match Reactor::bind(&config.bind, Arc::clone(&dispatcher), settings) {
            Ok(r) => r,
            Err(e) => {
                dispatcher.shutdown();
                return Err(e);
            }
        };
        Ok(Self {
            reactor,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.reactor.local_addr()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.reactor.shutdown_handle()
    }

    /// Serve until the shutdown handle fires, then stop dispatch and the workers
    pub fn run(mut self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            workers = self.dispatcher.pool().size(),
            "accepting uploads"
        );
        let result = self.reactor.run();
        self.dispatcher.shutdown();
        result
    }
}

/// Bind and serve until shut down
pub fn serve(config: &ServerConfig) -> Result<()> {
    Server::bind(config)?.run()
}
