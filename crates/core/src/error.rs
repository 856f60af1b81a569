/// Result alias that carries the custom [`ToneFleetError`] type.
pub type Result<T> = std::result::Result<T, ToneFleetError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ToneFleetError {
    /// Free-form error used where no more specific variant applies.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be understood.
    #[error("config line {line}: {message}")]
    Config { line: usize, message: String },
    /// A MIDI file could not be decoded.
    #[error("{path}: {message}")]
    Decode { path: String, message: String },
    /// Session or shell establishment failed for a target.
    #[error("failed to connect: {message}")]
    Connect { target: String, message: String },
    /// The remote host key did not pass known-hosts verification.
    #[error("host key verification failed: {message}")]
    HostKey { target: String, message: String },
    /// Writing a tone command to a target's shell failed.
    #[error("failed to send command: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },
    /// Terminal error of one target worker, re-raised by the run driver.
    #[error("[{target}] {source}")]
    Target {
        target: String,
        #[source]
        source: Box<ToneFleetError>,
    },
    /// A rendezvous participant disappeared before the handoff completed.
    #[error("rendezvous broken: {0}")]
    Barrier(&'static str),
}

impl ToneFleetError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Wraps a worker's terminal error with the name of its target.
    pub fn for_target(target: impl Into<String>, source: ToneFleetError) -> Self {
        Self::Target {
            target: target.into(),
            source: Box::new(source),
        }
    }
}

impl From<&str> for ToneFleetError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ToneFleetError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
