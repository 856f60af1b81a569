//! Two-phase start barrier shared by all target workers.
//!
//! Phase one counts connect attempts: every worker turns in its [`Ticket`]
//! once its session attempt is over, whether it succeeded or not. Phase two
//! hands out the start instant: the [`Coordinator`] picks one instant after
//! the last arrival and delivers a copy to every worker, so the number of
//! deliveries always equals the number of workers.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{Result, ToneFleetError};

/// Creates a barrier for `parties` workers. The shared start instant will be
/// `initial_delay` after the last worker arrives.
pub fn rendezvous(parties: usize, initial_delay: Duration) -> (Coordinator, Vec<Ticket>) {
    let (arrived_tx, arrived_rx) = bounded(parties);
    let (start_tx, start_rx) = bounded(parties);
    let tickets = (0..parties)
        .map(|_| Ticket {
            arrived: arrived_tx.clone(),
            start: start_rx.clone(),
        })
        .collect();
    let coordinator = Coordinator {
        parties,
        initial_delay,
        arrived: arrived_rx,
        start: start_tx,
    };
    (coordinator, tickets)
}

/// A worker's seat at the barrier. Arrival is signalled exactly once, either
/// through [`Ticket::arrive`] or when the ticket is dropped.
#[derive(Debug)]
pub struct Ticket {
    arrived: Sender<()>,
    start: Receiver<Instant>,
}

impl Ticket {
    /// Reports that the connect attempt has finished.
    pub fn arrive(self) -> StartGate {
        StartGate {
            start: self.start.clone(),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let _ = self.arrived.send(());
    }
}

/// Where an arrived worker waits for the start instant.
#[derive(Debug)]
pub struct StartGate {
    start: Receiver<Instant>,
}

impl StartGate {
    /// Blocks until the coordinator publishes the start instant.
    pub fn wait(self) -> Result<Instant> {
        self.start
            .recv()
            .map_err(|_| ToneFleetError::Barrier("coordinator left before publishing a start time"))
    }
}

#[derive(Debug)]
pub struct Coordinator {
    parties: usize,
    initial_delay: Duration,
    arrived: Receiver<()>,
    start: Sender<Instant>,
}

impl Coordinator {
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Waits for every worker to arrive, then delivers one start instant per
    /// worker and returns it.
    pub fn release(self) -> Result<Instant> {
        for arrived in 0..self.parties {
            self.arrived
                .recv()
                .map_err(|_| ToneFleetError::Barrier("a worker left without arriving"))?;
            tracing::trace!(arrived = arrived + 1, parties = self.parties, "worker arrived");
        }

        let start = Instant::now() + self.initial_delay;
        for _ in 0..self.parties {
            // Capacity equals the party count, so this never blocks.
            self.start
                .send(start)
                .map_err(|_| ToneFleetError::Barrier("every worker left before the start"))?;
        }
        Ok(start)
    }
}
