//! Real-time playback of one target's merged event stream.

use std::fmt;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use crate::mapping::midi_pitch_to_frequency;
use crate::sequence::EventKind;
use crate::timeline::MergedEvent;
use crate::tuning::TuningState;
use crate::{DebugSender, Result, ToneFleetError};

/// Length used for notes that are never released.
pub const DEFAULT_NOTE_LENGTH: Duration = Duration::from_secs(1);

/// One line of the remote command language, e.g.
/// `:beep frequency=440 length=500ms as-value;`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneCommand {
    pub frequency: f64,
    pub duration_ms: u64,
}

impl fmt::Display for ToneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":beep frequency={:.0} length={}ms as-value;",
            self.frequency, self.duration_ms
        )
    }
}

/// Rounds up to whole milliseconds.
pub fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// How long a note-on sounds, or `None` when its release does not come after
/// it.
pub fn note_length(event: &MergedEvent) -> Option<Duration> {
    let EventKind::NoteOn { note_off_tick, .. } = event.event.kind else {
        return None;
    };
    let Some(off_tick) = note_off_tick else {
        return Some(DEFAULT_NOTE_LENGTH);
    };
    let on = event.tempo.tick_to_duration(event.event.abs_tick);
    let off = event.tempo.tick_to_duration(off_tick);
    off.checked_sub(on).filter(|length| !length.is_zero())
}

/// Walks one target's stream against the shared start instant.
#[derive(Debug)]
pub struct Player<'a> {
    name: &'a str,
    debug: &'a DebugSender,
    tuning: TuningState,
}

impl<'a> Player<'a> {
    pub fn new(name: &'a str, debug: &'a DebugSender) -> Self {
        Self {
            name,
            debug,
            tuning: TuningState::new(),
        }
    }

    pub fn tuning(&self) -> &TuningState {
        &self.tuning
    }

    /// Applies an event to the tuning state and returns the command a note-on
    /// produces. Degenerate notes produce nothing.
    pub fn step(&mut self, event: &MergedEvent) -> Option<ToneCommand> {
        match event.event.kind {
            EventKind::NoteOn { key, .. } => {
                let length = note_length(event)?;
                Some(ToneCommand {
                    frequency: midi_pitch_to_frequency(self.tuning.effective_pitch(key)),
                    duration_ms: ceil_millis(length),
                })
            }
            EventKind::PitchBend { value, .. } => {
                self.tuning.set_pitch_bend(value);
                None
            }
            EventKind::Controller { number, value, .. } => {
                self.tuning.apply_controller(number, value);
                None
            }
            _ => None,
        }
    }

    /// Plays `events` in order, sleeping until each one's deadline measured
    /// from `start`. Late events fire immediately; every deadline is derived
    /// from `start`, so lateness never accumulates.
    pub fn run<W>(&mut self, events: &[MergedEvent], start: Instant, output: &mut W) -> Result<()>
    where
        W: Write + ?Sized,
    {
        tracing::debug!(device = self.name, events = events.len(), "playback started");
        for event in events {
            sleep_until(start + event.deadline());
            let Some(command) = self.step(event) else {
                continue;
            };
            writeln!(output, "{command}")
                .and_then(|()| output.flush())
                .map_err(|source| ToneFleetError::Write {
                    target: self.name.to_string(),
                    source,
                })?;
            self.debug
                .tone(self.name, command.frequency, command.duration_ms)?;
        }
        self.debug.line(self.name, "Closing connection")
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}
