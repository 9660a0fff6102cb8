//! Fan-out of simulation progress to observers.
//!
//! Each simulation owns one [`Broadcaster`] over a `tokio::sync::broadcast`
//! channel. Publishing never waits on subscribers. A subscriber that falls more
//! than the channel capacity behind skips ahead to the oldest retained event, so
//! it always sees the final status. Late subscribers only see events published
//! after they join.

use crate::types::{SimulationStatus, Snapshot, Trade};
use crate::Error;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

/// One message on a simulation's event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationEvent {
    /// Published after every tick.
    Tick {
        simulation_id: String,
        status: SimulationStatus,
        snapshot: Snapshot,
        /// Most recent trade of the simulation so far
        #[serde(skip_serializing_if = "Option::is_none")]
        latest_trade: Option<Trade>,
    },
    /// Published when the simulation starts and when it ends.
    StatusChanged {
        simulation_id: String,
        status: SimulationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
    },
}

impl SimulationEvent {
    pub fn simulation_id(&self) -> &str {
        match self {
            SimulationEvent::Tick { simulation_id, .. }
            | SimulationEvent::StatusChanged { simulation_id, .. } => simulation_id,
        }
    }

    pub fn status(&self) -> SimulationStatus {
        match self {
            SimulationEvent::Tick { status, .. } | SimulationEvent::StatusChanged { status, .. } => {
                *status
            }
        }
    }
}

/// Per-simulation subscriber set.
pub struct Broadcaster {
    buffer: usize,
    sender: Mutex<Option<broadcast::Sender<SimulationEvent>>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("buffer", &self.buffer)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Broadcaster {
    /// `buffer` is how many events a subscriber may fall behind before it skips ahead.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (sender, _) = broadcast::channel(buffer);
        Self {
            buffer,
            sender: Mutex::new(Some(sender)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<broadcast::Sender<SimulationEvent>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the stream. After [`close`](Self::close) the subscription ends immediately.
    pub fn subscribe(&self) -> SimulationSubscription {
        let receiver = match self.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        SimulationSubscription {
            receiver,
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().as_ref().map_or(0, broadcast::Sender::receiver_count)
    }

    /// Send `event` to every subscriber without waiting. Returns the number
    /// of subscribers that will see it.
    pub fn publish(&self, event: &SimulationEvent) -> usize {
        self.lock()
            .as_ref()
            .and_then(|sender| sender.send(event.clone()).ok())
            .unwrap_or(0)
    }

    /// End every stream once its backlog is drained. Later subscribers get an
    /// already-finished stream.
    pub fn close(&self) {
        self.lock().take();
    }
}

/// Receiving end of a simulation's event stream.
#[derive(Debug)]
pub struct SimulationSubscription {
    receiver: broadcast::Receiver<SimulationEvent>,
    missed: u64,
}

impl SimulationSubscription {
    /// Next event, or `None` once the simulation has finished and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<SimulationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.skip(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SimulationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.skip(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscriber skipped because it fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn skip(&mut self, skipped: u64) {
        self.missed += skipped;
        let err = Error::Broadcast(format!("subscriber lagged by {} events", skipped));
        debug!(%err, total_missed = self.missed, "skipping ahead");
    }

    pub fn into_stream(self) -> impl Stream<Item = SimulationEvent> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}
