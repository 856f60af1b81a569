//! In-memory MIDI sequences and the Standard MIDI File decoder that feeds
//! them.
//!
//! A [`Sequence`] is read-only once decoded. Each [`Track`] carries its own
//! [`TempoMap`] so that every event can be converted from ticks to time
//! without knowing which file it came from.

mod tempo;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

pub use tempo::{TempoMap, DEFAULT_MICROS_PER_QUARTER};

use crate::{Result, ToneFleetError};

/// What a decoded event means to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
        /// Absolute tick of the matching note-off, if the note is ever
        /// released.
        note_off_tick: Option<u64>,
    },
    NoteOff {
        channel: u8,
        key: u8,
    },
    PitchBend {
        channel: u8,
        /// Signed bend, `0` is centred, range `-8192..=8191`.
        value: i16,
    },
    Controller {
        channel: u8,
        number: u8,
        value: u8,
    },
    Tempo {
        micros_per_quarter: u32,
    },
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub abs_tick: u64,
    /// Ordinal of the event in file order across all tracks. Breaks ties
    /// between events sharing a tick.
    pub file_position: u64,
    pub kind: EventKind,
}

impl TrackEvent {
    pub fn new(abs_tick: u64, file_position: u64, kind: EventKind) -> Self {
        Self {
            abs_tick,
            file_position,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    events: Vec<TrackEvent>,
    tempo: Arc<TempoMap>,
}

impl Track {
    pub fn new(events: Vec<TrackEvent>, tempo: Arc<TempoMap>) -> Self {
        Self { events, tempo }
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn tempo(&self) -> &Arc<TempoMap> {
        &self.tempo
    }

    pub fn tick_to_duration(&self, tick: u64) -> Duration {
        self.tempo.tick_to_duration(tick)
    }

    /// Time of the last event in the track, or zero for an empty track.
    pub fn duration(&self) -> Duration {
        self.events
            .last()
            .map(|event| self.tick_to_duration(event.abs_tick))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sequence {
    tracks: Vec<Track>,
}

impl Sequence {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Length of the song: the latest end over all tracks.
    pub fn duration(&self) -> Duration {
        self.tracks
            .iter()
            .map(Track::duration)
            .max()
            .unwrap_or_default()
    }
}

/// Result of decoding a Standard MIDI File.
#[derive(Debug)]
pub struct DecodedSequence {
    pub sequence: Sequence,
    /// Recoverable problems found while decoding.
    pub warnings: Vec<String>,
}

/// Reads and decodes a Standard MIDI File, logging every decode warning.
pub fn load_sequence(path: &Path) -> Result<Sequence> {
    let bytes = std::fs::read(path)?;
    let decoded = decode_sequence(&bytes).map_err(|err| ToneFleetError::Decode {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    for warning in &decoded.warnings {
        tracing::warn!(file = %path.display(), "{warning}");
    }
    Ok(decoded.sequence)
}

/// Decodes a Standard MIDI File held in memory.
pub fn decode_sequence(bytes: &[u8]) -> Result<DecodedSequence> {
    let smf = Smf::parse(bytes).map_err(|err| ToneFleetError::msg(err.to_string()))?;
    let mut warnings = Vec::new();
    let mut file_position = 0u64;

    let mut raw_tracks = Vec::with_capacity(smf.tracks.len());
    for (track_index, raw) in smf.tracks.iter().enumerate() {
        let mut events = Vec::with_capacity(raw.len());
        let mut abs_tick = 0u64;
        for event in raw {
            abs_tick += u64::from(event.delta.as_int());
            events.push(TrackEvent::new(abs_tick, file_position, convert_kind(&event.kind)));
            file_position += 1;
        }
        link_note_offs(track_index, &mut events, &mut warnings);
        raw_tracks.push(events);
    }

    let tracks = match smf.header.timing {
        Timing::Timecode(fps, ticks_per_frame) => {
            let tempo = Arc::new(TempoMap::timecode(fps.as_f32(), ticks_per_frame));
            raw_tracks
                .into_iter()
                .map(|events| Track::new(events, Arc::clone(&tempo)))
                .collect()
        }
        Timing::Metrical(ticks_per_quarter) => {
            let ticks_per_quarter = ticks_per_quarter.as_int();
            if ticks_per_quarter == 0 {
                return Err(ToneFleetError::msg("header declares zero ticks per quarter note"));
            }
            if smf.header.format == Format::Sequential {
                // Every track of a format 2 file is an independent pattern.
                raw_tracks
                    .into_iter()
                    .map(|events| {
                        let tempo = TempoMap::metrical(ticks_per_quarter, tempo_changes(&events));
                        Track::new(events, Arc::new(tempo))
                    })
                    .collect()
            } else {
                let changes: Vec<(u64, u32)> =
                    raw_tracks.iter().flat_map(|events| tempo_changes(events)).collect();
                let tempo = Arc::new(TempoMap::metrical(ticks_per_quarter, changes));
                raw_tracks
                    .into_iter()
                    .map(|events| Track::new(events, Arc::clone(&tempo)))
                    .collect()
            }
        }
    };

    Ok(DecodedSequence {
        sequence: Sequence::new(tracks),
        warnings,
    })
}

fn tempo_changes(events: &[TrackEvent]) -> Vec<(u64, u32)> {
    events
        .iter()
        .filter_map(|event| match event.kind {
            EventKind::Tempo { micros_per_quarter } => {
                Some((event.abs_tick, micros_per_quarter))
            }
            _ => None,
        })
        .collect()
}

fn convert_kind(kind: &TrackEventKind<'_>) -> EventKind {
    match *kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => EventKind::NoteOn {
                    channel,
                    key: key.as_int(),
                    velocity: vel.as_int(),
                    note_off_tick: None,
                },
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    EventKind::NoteOff {
                        channel,
                        key: key.as_int(),
                    }
                }
                MidiMessage::PitchBend { bend } => EventKind::PitchBend {
                    channel,
                    value: bend.0.as_int() as i16 - 0x2000,
                },
                MidiMessage::Controller { controller, value } => EventKind::Controller {
                    channel,
                    number: controller.as_int(),
                    value: value.as_int(),
                },
                _ => EventKind::Other,
            }
        }
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => EventKind::Tempo {
            micros_per_quarter: tempo.as_int(),
        },
        _ => EventKind::Other,
    }
}

// Pairs each note-on with the first later note-off for the same channel and
// key. Overlapping notes on one key are released first-in, first-out.
fn link_note_offs(track_index: usize, events: &mut [TrackEvent], warnings: &mut Vec<String>) {
    let mut pending: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();
    for index in 0..events.len() {
        let event = events[index];
        match event.kind {
            EventKind::NoteOn { channel, key, .. } => {
                pending.entry((channel, key)).or_default().push_back(index);
            }
            EventKind::NoteOff { channel, key } => {
                let opened = pending
                    .get_mut(&(channel, key))
                    .and_then(VecDeque::pop_front);
                match opened {
                    Some(on_index) => {
                        if let EventKind::NoteOn { note_off_tick, .. } =
                            &mut events[on_index].kind
                        {
                            *note_off_tick = Some(event.abs_tick);
                        }
                    }
                    None => warnings.push(format!(
                        "track {track_index}: note-off for key {key} on channel {channel} \
                         at tick {} has no matching note-on",
                        event.abs_tick
                    )),
                }
            }
            _ => {}
        }
    }

    let mut dangling: Vec<usize> = pending.into_values().flatten().collect();
    dangling.sort_unstable();
    for index in dangling {
        if let EventKind::NoteOn { channel, key, .. } = events[index].kind {
            warnings.push(format!(
                "track {track_index}: note-on for key {key} on channel {channel} \
                 at tick {} is never released",
                events[index].abs_tick
            ));
        }
    }
}
