use std::time::Duration;

/// Tempo assumed until the first tempo meta event (120 BPM).
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeBase {
    Metrical { ticks_per_quarter: u16 },
    Timecode { ticks_per_second: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TempoChange {
    tick: u64,
    elapsed_nanos: u128,
    micros_per_quarter: u32,
}

/// Converts absolute ticks of one track into elapsed time since the start of
/// its song, following every tempo change that applies to the track.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    base: TimeBase,
    changes: Vec<TempoChange>,
}

impl TempoMap {
    /// Builds a tempo map for metrical (ticks per quarter note) timing.
    ///
    /// `changes` are `(tick, microseconds per quarter)` pairs in any order.
    /// When several changes share a tick the last one wins.
    pub fn metrical(
        ticks_per_quarter: u16,
        changes: impl IntoIterator<Item = (u64, u32)>,
    ) -> Self {
        let ticks_per_quarter = ticks_per_quarter.max(1);
        let mut raw: Vec<(u64, u32)> = changes.into_iter().collect();
        raw.sort_by_key(|(tick, _)| *tick);

        let mut resolved: Vec<TempoChange> = vec![TempoChange {
            tick: 0,
            elapsed_nanos: 0,
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
        }];
        for (tick, micros_per_quarter) in raw {
            let micros_per_quarter = micros_per_quarter.max(1);
            let Some(last) = resolved.last_mut() else {
                continue;
            };
            if last.tick == tick {
                last.micros_per_quarter = micros_per_quarter;
                continue;
            }
            let elapsed_nanos = last.elapsed_nanos
                + span_nanos(tick - last.tick, last.micros_per_quarter, ticks_per_quarter);
            resolved.push(TempoChange {
                tick,
                elapsed_nanos,
                micros_per_quarter,
            });
        }

        Self {
            base: TimeBase::Metrical { ticks_per_quarter },
            changes: resolved,
        }
    }

    /// Tempo map with a single fixed tempo.
    pub fn constant(ticks_per_quarter: u16, micros_per_quarter: u32) -> Self {
        Self::metrical(ticks_per_quarter, [(0, micros_per_quarter)])
    }

    /// Builds a tempo map for SMPTE timecode timing, where tempo events have
    /// no effect.
    pub fn timecode(frames_per_second: f32, ticks_per_frame: u8) -> Self {
        let ticks_per_second = f64::from(frames_per_second) * f64::from(ticks_per_frame.max(1));
        Self {
            base: TimeBase::Timecode {
                ticks_per_second: ticks_per_second.max(1.0),
            },
            changes: Vec::new(),
        }
    }

    /// Elapsed time from the start of the track to `tick`.
    pub fn tick_to_duration(&self, tick: u64) -> Duration {
        match self.base {
            TimeBase::Timecode { ticks_per_second } => {
                Duration::from_secs_f64(tick as f64 / ticks_per_second)
            }
            TimeBase::Metrical { ticks_per_quarter } => {
                let index = self.changes.partition_point(|change| change.tick <= tick);
                let Some(change) = index.checked_sub(1).and_then(|i| self.changes.get(i)) else {
                    return Duration::ZERO;
                };
                let nanos = change.elapsed_nanos
                    + span_nanos(tick - change.tick, change.micros_per_quarter, ticks_per_quarter);
                duration_from_nanos(nanos)
            }
        }
    }
}

fn span_nanos(ticks: u64, micros_per_quarter: u32, ticks_per_quarter: u16) -> u128 {
    u128::from(ticks) * u128::from(micros_per_quarter) * 1_000 / u128::from(ticks_per_quarter)
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = nanos / 1_000_000_000;
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(u64::try_from(secs).unwrap_or(u64::MAX), subsec)
}
