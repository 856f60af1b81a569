//! Core library for ToneFleet.
//!
//! ToneFleet splits a playlist of MIDI files across several remote devices
//! that can only beep, and plays them as one synchronized performance. Each
//! module owns one stage of that pipeline: decoding songs, merging the events
//! each device plays, meeting at a shared start instant, and dispatching
//! tone commands over a remote shell in real time.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mapping;
pub mod performance;
pub mod record;
pub mod rendezvous;
pub mod sequence;
pub mod session;
pub mod timeline;
pub mod tuning;

pub use config::{AppConfig, TargetConfig, TrackSelection};
pub use dispatch::{Player, ToneCommand};
pub use error::{Result, ToneFleetError};
pub use mapping::midi_pitch_to_frequency;
pub use performance::{Performance, PlanSummary, TargetPlan};
pub use record::{DebugRecord, DebugSender, DebugSink, RecordBody};
pub use rendezvous::{rendezvous, Coordinator, StartGate, Ticket};
pub use sequence::{load_sequence, Sequence, TempoMap, Track, TrackEvent};
#[cfg(feature = "ssh")]
pub use session::SshConnector;
pub use session::{Connector, Shell};
pub use timeline::{merge_events, ClaimedTracks, MergedEvent, Playlist, PlaylistEntry};
pub use tuning::TuningState;
