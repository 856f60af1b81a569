//! Fan-in of console records from every target onto one writer.
//!
//! Target workers never print directly. They push [`DebugRecord`]s into a
//! bounded queue that a single sink thread drains in arrival order, so lines
//! from different targets never interleave mid-line.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{Result, ToneFleetError};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Line(String),
    /// Echo of a tone command that was sent to a target.
    Tone { frequency: f64, duration_ms: u64 },
}

#[derive(Debug)]
pub struct DebugRecord {
    pub target: String,
    pub body: RecordBody,
    /// Signalled by the sink once the record has been written out.
    ack: Option<Sender<()>>,
}

impl DebugRecord {
    pub fn new(target: impl Into<String>, body: RecordBody) -> Self {
        Self {
            target: target.into(),
            body,
            ack: None,
        }
    }
}

/// Producer handle; clone one per worker.
#[derive(Debug, Clone)]
pub struct DebugSender {
    tx: Sender<DebugRecord>,
}

impl DebugSender {
    pub fn send(&self, record: DebugRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| ToneFleetError::msg("debug sink has shut down"))
    }

    pub fn line(&self, target: &str, text: impl Into<String>) -> Result<()> {
        self.send(DebugRecord::new(target, RecordBody::Line(text.into())))
    }

    pub fn tone(&self, target: &str, frequency: f64, duration_ms: u64) -> Result<()> {
        self.send(DebugRecord::new(
            target,
            RecordBody::Tone {
                frequency,
                duration_ms,
            },
        ))
    }

    /// Sends a line and blocks until the sink has written and flushed it.
    pub fn line_flushed(&self, target: &str, text: impl Into<String>) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        let mut record = DebugRecord::new(target, RecordBody::Line(text.into()));
        record.ack = Some(ack_tx);
        self.send(record)?;
        ack_rx
            .recv()
            .map_err(|_| ToneFleetError::msg("debug sink stopped before flushing"))
    }
}

/// The single consumer thread behind every [`DebugSender`].
#[derive(Debug)]
pub struct DebugSink {
    handle: JoinHandle<io::Result<()>>,
}

impl DebugSink {
    /// Starts the sink thread writing to `writer`. The queue holds at most
    /// `capacity` records before producers block.
    pub fn spawn<W>(writer: W, capacity: usize) -> Result<(DebugSender, DebugSink)>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("debug-sink".to_string())
            .spawn(move || drain(rx, writer))?;
        Ok((DebugSender { tx }, DebugSink { handle }))
    }

    /// Waits for the sink to drain. Returns once every sender has been
    /// dropped and every queued record is written.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| ToneFleetError::msg("debug sink panicked"))?
            .map_err(ToneFleetError::from)
    }
}

fn drain<W: Write>(rx: Receiver<DebugRecord>, mut writer: W) -> io::Result<()> {
    let mut first_error = None;
    for record in rx {
        tracing::debug!(device = %record.target, body = ?record.body, "debug record");
        let written = render(&record, &mut writer).and_then(|()| writer.flush());
        if let Err(err) = written {
            first_error.get_or_insert(err);
        }
        if let Some(ack) = record.ack {
            let _ = ack.send(());
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn render<W: Write>(record: &DebugRecord, writer: &mut W) -> io::Result<()> {
    if !record.target.is_empty() {
        write!(writer, "[{}] ", record.target)?;
    }
    match &record.body {
        RecordBody::Line(text) => writeln!(writer, "{text}"),
        RecordBody::Tone {
            frequency,
            duration_ms,
        } => writeln!(
            writer,
            "> :beep as-value frequency={frequency:<5.0} length={duration_ms}ms;"
        ),
    }
}
