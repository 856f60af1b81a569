//! Playlist bookkeeping and per-target event merging.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::sequence::{EventKind, Sequence, TempoMap, TrackEvent};
use crate::tuning::controller;
use crate::TrackSelection;

#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub sequence: Sequence,
    pub duration: Duration,
}

/// Songs played back to back. Each song starts when the previous one's
/// latest event has sounded.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a song and returns its duration.
    pub fn push(&mut self, sequence: Sequence) -> Duration {
        let duration = sequence.duration();
        self.entries.push(PlaylistEntry { sequence, duration });
        duration
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries.iter().map(|entry| entry.duration).sum()
    }

    /// Start offset of every entry relative to the start of the playlist.
    pub fn offsets(&self) -> Vec<Duration> {
        self.entries
            .iter()
            .scan(Duration::ZERO, |start, entry| {
                let offset = *start;
                *start += entry.duration;
                Some(offset)
            })
            .collect()
    }
}

/// Union of every track index that some target selects explicitly.
///
/// Computed once from the complete target list before any stream is merged,
/// so that "other tracks" never picks up a track another target owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimedTracks(BTreeSet<u16>);

impl ClaimedTracks {
    pub fn collect<'a>(selections: impl IntoIterator<Item = &'a TrackSelection>) -> Self {
        Self(
            selections
                .into_iter()
                .flat_map(|selection| selection.tracks.iter().copied())
                .collect(),
        )
    }

    pub fn contains(&self, track: u16) -> bool {
        self.0.contains(&track)
    }
}

impl TrackSelection {
    /// Whether a track index belongs to this selection given the globally
    /// claimed set.
    pub fn includes(&self, track: usize, claimed: &ClaimedTracks) -> bool {
        match u16::try_from(track) {
            Ok(track) if self.tracks.contains(&track) => true,
            Ok(track) => self.other_tracks && !claimed.contains(track),
            Err(_) => self.other_tracks,
        }
    }
}

/// An event scheduled for one target, anchored in playlist time.
#[derive(Debug, Clone)]
pub struct MergedEvent {
    pub song_index: usize,
    pub event: TrackEvent,
    /// Tick converter of the track the event came from.
    pub tempo: Arc<TempoMap>,
    pub song_start: Duration,
}

impl MergedEvent {
    /// Offset of the event from the start of the whole playlist.
    pub fn deadline(&self) -> Duration {
        self.song_start + self.tempo.tick_to_duration(self.event.abs_tick)
    }

    pub fn order_key(&self) -> (usize, u64, u64) {
        (self.song_index, self.event.abs_tick, self.event.file_position)
    }
}

fn is_dispatchable(kind: &EventKind) -> bool {
    match kind {
        EventKind::NoteOn { .. } | EventKind::PitchBend { .. } => true,
        EventKind::Controller { number, .. } => controller::is_tuning(*number),
        _ => false,
    }
}

/// Builds the time-ordered event stream for one target.
///
/// Only note-ons, pitch bends and tuning controllers survive; note-offs are
/// reached through their note-on. The result is ordered by song, tick and
/// file position.
pub fn merge_events(
    playlist: &Playlist,
    selection: &TrackSelection,
    claimed: &ClaimedTracks,
) -> Vec<MergedEvent> {
    let mut merged = Vec::new();
    let songs = playlist.entries().iter().zip(playlist.offsets()).enumerate();
    for (song_index, (entry, song_start)) in songs {
        for (track_index, track) in entry.sequence.tracks().iter().enumerate() {
            if !selection.includes(track_index, claimed) {
                continue;
            }
            merged.extend(
                track
                    .events()
                    .iter()
                    .filter(|event| is_dispatchable(&event.kind))
                    .map(|event| MergedEvent {
                        song_index,
                        event: *event,
                        tempo: Arc::clone(track.tempo()),
                        song_start,
                    }),
            );
        }
    }
    merged.sort_by_key(MergedEvent::order_key);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Track;

    fn note(tick: u64, position: u64, key: u8) -> TrackEvent {
        TrackEvent::new(
            tick,
            position,
            EventKind::NoteOn {
                channel: 0,
                key,
                velocity: 100,
                note_off_tick: Some(tick + 240),
            },
        )
    }

    fn track(events: Vec<TrackEvent>) -> Track {
        Track::new(events, Arc::new(TempoMap::constant(480, 500_000)))
    }

    fn keys(stream: &[MergedEvent]) -> Vec<u8> {
        stream
            .iter()
            .filter_map(|merged| match merged.event.kind {
                EventKind::NoteOn { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    fn two_track_song() -> Sequence {
        Sequence::new(vec![
            track(vec![note(0, 0, 60), note(480, 1, 62)]),
            track(vec![note(0, 2, 40), note(240, 3, 41)]),
        ])
    }

    #[test]
    fn playlist_offsets_accumulate_durations() {
        let mut playlist = Playlist::new();
        assert_eq!(playlist.push(two_track_song()), Duration::from_millis(500));
        assert_eq!(playlist.push(Sequence::default()), Duration::ZERO);
        playlist.push(two_track_song());

        assert_eq!(
            playlist.offsets(),
            vec![Duration::ZERO, Duration::from_millis(500), Duration::from_millis(500)]
        );
        assert_eq!(playlist.total_duration(), Duration::from_secs(1));
    }

    #[test]
    fn orders_by_song_tick_and_file_position() {
        let mut playlist = Playlist::new();
        playlist.push(two_track_song());
        playlist.push(two_track_song());

        let all = TrackSelection::explicit([0, 1]);
        let claimed = ClaimedTracks::collect([&all]);
        let stream = merge_events(&playlist, &all, &claimed);

        assert_eq!(keys(&stream), [60, 40, 41, 62, 60, 40, 41, 62]);
        assert!(stream
            .windows(2)
            .all(|pair| pair[0].order_key() < pair[1].order_key()));
        assert_eq!(stream[4].song_start, Duration::from_millis(500));
        assert_eq!(stream[7].deadline(), Duration::from_millis(1_000));
    }

    #[test]
    fn tie_break_uses_file_position_not_insertion_order() {
        // Track 0 holds the later file positions, so track 1 must win ties.
        let song = Sequence::new(vec![
            track(vec![note(0, 10, 70)]),
            track(vec![note(0, 5, 50)]),
        ]);
        let mut playlist = Playlist::new();
        playlist.push(song);

        let selection = TrackSelection::other();
        let stream = merge_events(&playlist, &selection, &ClaimedTracks::default());
        assert_eq!(keys(&stream), [50, 70]);
    }

    #[test]
    fn other_tracks_skip_tracks_claimed_elsewhere() {
        let mut playlist = Playlist::new();
        playlist.push(Sequence::new(vec![
            track(vec![note(0, 0, 1)]),
            track(vec![note(0, 1, 2)]),
            track(vec![note(0, 2, 3)]),
        ]));

        let lead = TrackSelection::explicit([1]);
        let rest = TrackSelection::explicit([2]).with_other();
        let claimed = ClaimedTracks::collect([&lead, &rest]);

        assert_eq!(keys(&merge_events(&playlist, &lead, &claimed)), [2]);
        assert_eq!(keys(&merge_events(&playlist, &rest, &claimed)), [1, 3]);
    }

    #[test]
    fn keeps_only_dispatchable_events() {
        let events = vec![
            note(0, 0, 60),
            TrackEvent::new(0, 1, EventKind::NoteOff { channel: 0, key: 60 }),
            TrackEvent::new(0, 2, EventKind::PitchBend { channel: 0, value: 100 }),
            TrackEvent::new(0, 3, EventKind::Controller { channel: 0, number: 0x07, value: 90 }),
            TrackEvent::new(0, 4, EventKind::Controller { channel: 0, number: 0x65, value: 0 }),
            TrackEvent::new(0, 5, EventKind::Tempo { micros_per_quarter: 400_000 }),
            TrackEvent::new(0, 6, EventKind::Other),
        ];
        let mut playlist = Playlist::new();
        playlist.push(Sequence::new(vec![track(events)]));

        let stream = merge_events(&playlist, &TrackSelection::other(), &ClaimedTracks::default());
        let positions: Vec<u64> = stream.iter().map(|m| m.event.file_position).collect();
        assert_eq!(positions, [0, 2, 4]);
    }

    #[test]
    fn empty_selection_yields_nothing() {
        let mut playlist = Playlist::new();
        playlist.push(two_track_song());
        let stream = merge_events(&playlist, &TrackSelection::default(), &ClaimedTracks::default());
        assert!(stream.is_empty());
    }
}
