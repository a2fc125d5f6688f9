//! Unit-of-work abstraction shared by the pool, the dispatcher and the reactor

use std::sync::Arc;

/// Identifier of one accepted connection; doubles as its reactor token
pub type ConnId = usize;

/// A connection-bound unit of work.
///
/// `run` performs one bounded step and must not block waiting for more input.
/// `destroy` is called by the executing worker right after `run` returns and
/// decides whether the connection is re-armed or released.
pub trait Task: Send + Sync {
    fn id(&self) -> ConnId;
    fn run(&self);
    fn destroy(&self);

    /// Called in place of a normal return when `run` panicked. Afterwards
    /// `destroy` must release the connection.
    fn abandon(&self) {}
}

pub type TaskRef = Arc<dyn Task>;

/// Hooks back into whatever produces readiness events for a connection
pub trait Readiness: Send + Sync {
    /// Deliver the next readiness event for `id` once it becomes readable
    fn rearm(&self, id: ConnId);
    /// Connection is finished; drop its task and stop watching it
    fn release(&self, id: ConnId);
}
