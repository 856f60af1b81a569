//! Remote shell sessions that tone commands are written to.

#[cfg(feature = "ssh")]
mod ssh;

use std::io::Write;

#[cfg(feature = "ssh")]
pub use ssh::{SshConnector, CONNECT_TIMEOUT};

use crate::{DebugSender, Result, TargetConfig};

/// Writable end of an interactive shell on a target.
pub trait Shell: Write + Send {
    /// Closes the input side and waits until the remote output has been
    /// forwarded to the debug sink.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens shells on targets. One connector is shared by every worker.
pub trait Connector: Send + Sync + 'static {
    /// Establishes the session and starts a shell. Diagnostic text from the
    /// remote end is reported through `debug` under the target's name.
    fn connect(&self, target: &TargetConfig, debug: &DebugSender) -> Result<Box<dyn Shell>>;
}
