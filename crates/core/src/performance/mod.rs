//! Run driver: one worker per target, gated by the rendezvous barrier.
//!
//! A performance is all-or-nothing. The first target that fails ends the
//! run as soon as its error message has been flushed, even if the other
//! targets are still playing.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use serde::Serialize;

use crate::dispatch::Player;
use crate::rendezvous::{rendezvous, Ticket};
use crate::sequence::EventKind;
use crate::session::Connector;
use crate::timeline::{merge_events, ClaimedTracks, MergedEvent, Playlist};
use crate::{AppConfig, DebugSender, Result, TargetConfig, ToneFleetError};

/// A target together with the stream it will play.
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub target: TargetConfig,
    pub events: Vec<MergedEvent>,
}

/// Printable overview of one target's share of the playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub name: String,
    pub address: String,
    pub events: usize,
    pub notes: usize,
    pub last_event_at: Duration,
}

impl TargetPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            name: self.target.name.clone(),
            address: self.target.address(),
            events: self.events.len(),
            notes: self
                .events
                .iter()
                .filter(|merged| matches!(merged.event.kind, EventKind::NoteOn { .. }))
                .count(),
            last_event_at: self
                .events
                .last()
                .map(MergedEvent::deadline)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Performance {
    initial_delay: Duration,
    plans: Vec<TargetPlan>,
}

impl Performance {
    /// Splits the playlist into one stream per configured target.
    pub fn new(config: &AppConfig, playlist: &Playlist) -> Self {
        let claimed = ClaimedTracks::collect(config.targets.iter().map(|target| &target.tracks));
        let plans = config
            .targets
            .iter()
            .map(|target| TargetPlan {
                target: target.clone(),
                events: merge_events(playlist, &target.tracks, &claimed),
            })
            .collect();
        Self {
            initial_delay: config.initial_delay,
            plans,
        }
    }

    pub fn plans(&self) -> &[TargetPlan] {
        &self.plans
    }

    pub fn summary(&self) -> Vec<PlanSummary> {
        self.plans.iter().map(TargetPlan::summary).collect()
    }

    /// Connects every target, starts them together and waits for the end of
    /// the performance or the first failure.
    pub fn run<C: Connector>(self, connector: Arc<C>, debug: &DebugSender) -> Result<()> {
        let parties = self.plans.len();
        let (coordinator, tickets) = rendezvous(parties, self.initial_delay);
        let (done_tx, done_rx) = unbounded();

        for (plan, ticket) in self.plans.into_iter().zip(tickets) {
            tracing::info!(
                device = %plan.target.name,
                events = plan.events.len(),
                "merged event stream"
            );
            let connector = Arc::clone(&connector);
            let debug = debug.clone();
            let done = done_tx.clone();
            thread::Builder::new()
                .name(format!("target-{}", plan.target.name))
                .spawn(move || {
                    let name = plan.target.name.clone();
                    let result = perform(plan, &*connector, ticket, &debug);
                    if let Err(err) = &result {
                        let _ = debug.line_flushed(&name, err.to_string());
                    }
                    let _ = done.send((name, result));
                })?;
        }
        drop(done_tx);

        coordinator.release()?;
        tracing::info!(delay = ?self.initial_delay, "all targets checked in, start time published");

        for _ in 0..parties {
            let (name, result) = done_rx
                .recv()
                .map_err(|_| ToneFleetError::Barrier("a target worker vanished"))?;
            match result {
                Ok(()) => tracing::info!(device = %name, "target finished"),
                Err(err) => return Err(ToneFleetError::for_target(name, err)),
            }
        }
        Ok(())
    }
}

fn perform<C: Connector + ?Sized>(
    plan: TargetPlan,
    connector: &C,
    ticket: Ticket,
    debug: &DebugSender,
) -> Result<()> {
    let connected = connector.connect(&plan.target, debug);
    // Failed workers still collect their start instant so every delivery is
    // consumed.
    let start = ticket.arrive().wait()?;
    let mut shell = connected?;
    Player::new(&plan.target.name, debug).run(&plan.events, start, &mut shell)?;
    shell.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackSelection;
    use crate::sequence::{Sequence, TempoMap, Track, TrackEvent};
    use crate::session::testing::MemoryConnector;
    use crate::DebugSink;
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn note(tick: u64, position: u64, key: u8) -> TrackEvent {
        TrackEvent::new(
            tick,
            position,
            EventKind::NoteOn {
                channel: 0,
                key,
                velocity: 90,
                note_off_tick: Some(tick + 48),
            },
        )
    }

    // Two tracks of two short notes each, 480 ticks per quarter at 120 BPM.
    fn playlist() -> Playlist {
        let tempo = Arc::new(TempoMap::constant(480, 500_000));
        let mut playlist = Playlist::new();
        playlist.push(Sequence::new(vec![
            Track::new(vec![note(0, 0, 69), note(24, 1, 71)], Arc::clone(&tempo)),
            Track::new(vec![note(0, 2, 45), note(24, 3, 47)], tempo),
        ]));
        playlist
    }

    fn target(name: &str, tracks: TrackSelection) -> TargetConfig {
        let mut target = TargetConfig::new(format!("{name}.test"));
        target.name = name.to_string();
        target.tracks = tracks;
        target
    }

    fn config(targets: Vec<TargetConfig>) -> AppConfig {
        AppConfig {
            known_hosts: "/dev/null".into(),
            initial_delay: Duration::from_millis(10),
            targets,
        }
    }

    #[test]
    fn plans_split_tracks_between_targets() {
        let config = config(vec![
            target("lead", TrackSelection::explicit([0])),
            target("rest", TrackSelection::other()),
        ]);
        let summary = Performance::new(&config, &playlist()).summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "lead");
        assert_eq!(summary[0].address, "lead.test:22");
        assert_eq!(summary[0].notes, 2);
        assert_eq!(summary[1].notes, 2);
        assert_eq!(summary[1].last_event_at, Duration::from_millis(25));
    }

    #[test]
    fn every_connected_target_plays_its_share() {
        let config = config(vec![
            target("lead", TrackSelection::explicit([0])),
            target("rest", TrackSelection::other()),
        ]);
        let connector = Arc::new(
            MemoryConnector::default().with_latency("rest", Duration::from_millis(30)),
        );
        let echo = SharedBuffer::default();
        let (debug, sink) = DebugSink::spawn(echo.clone(), 4).unwrap();

        Performance::new(&config, &playlist())
            .run(Arc::clone(&connector), &debug)
            .unwrap();
        drop(debug);
        sink.join().unwrap();

        assert_eq!(
            connector.output("lead"),
            ":beep frequency=440 length=50ms as-value;\n\
             :beep frequency=494 length=50ms as-value;\n"
        );
        assert_eq!(
            connector.output("rest"),
            ":beep frequency=110 length=50ms as-value;\n\
             :beep frequency=123 length=50ms as-value;\n"
        );
        let log = echo.contents();
        assert!(log.contains("[lead] Closing connection"));
        assert!(log.contains("[rest] Closing connection"));
    }

    #[test]
    fn failed_connection_aborts_the_run_after_flushing() {
        let config = config(vec![
            target("lead", TrackSelection::explicit([0])),
            target("bass", TrackSelection::other()),
            target("drums", TrackSelection::default()),
        ]);
        let connector = Arc::new(MemoryConnector::default().failing("bass"));
        let echo = SharedBuffer::default();
        let (debug, sink) = DebugSink::spawn(echo.clone(), 4).unwrap();

        let err = Performance::new(&config, &playlist())
            .run(connector, &debug)
            .unwrap_err();
        match &err {
            ToneFleetError::Target { target, source } => {
                assert_eq!(target, "bass");
                assert!(matches!(**source, ToneFleetError::Connect { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(echo
            .contents()
            .contains("[bass] failed to connect: connection refused"));
        drop(debug);
        drop(sink);
    }

    #[test]
    fn all_targets_failing_still_terminates() {
        let config = config(vec![
            target("a", TrackSelection::other()),
            target("b", TrackSelection::other()),
        ]);
        let connector = Arc::new(MemoryConnector::default().failing("a").failing("b"));
        let (debug, sink) = DebugSink::spawn(io::sink(), 2).unwrap();

        let err = Performance::new(&config, &playlist())
            .run(connector, &debug)
            .unwrap_err();
        assert!(matches!(err, ToneFleetError::Target { .. }));
        drop(debug);
        sink.join().unwrap();
    }
}
