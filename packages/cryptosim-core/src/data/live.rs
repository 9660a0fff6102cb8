//! In-process live feed.
//!
//! Whatever drives the feed (an exchange adapter, a CSV replay, a test) calls
//! [`LiveFeedHub::publish`]; realtime simulations subscribe through the
//! [`LiveDataProvider`] trait.

use super::{LiveDataProvider, LiveSubscription};
use crate::types::Bar;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    symbols: HashSet<String>,
    sender: mpsc::Sender<Result<Bar>>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Fans bars out to every subscriber of their symbol.
#[derive(Clone, Default)]
pub struct LiveFeedHub {
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for LiveFeedHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeedHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl LiveFeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Deliver a bar to every subscriber of its symbol, waiting for room in
    /// full channels. Returns how many subscribers received it.
    pub async fn publish(&self, bar: Bar) -> usize {
        let symbol = bar.symbol.to_uppercase();
        let targets: Vec<(u64, mpsc::Sender<Result<Bar>>)> = self
            .state()
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.symbols.contains(&symbol))
            .map(|(id, sub)| (*id, sub.sender.clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in targets {
            let mut bar = bar.clone();
            bar.symbol = symbol.clone();
            if sender.send(Ok(bar)).await.is_ok() {
                delivered += 1;
            } else {
                debug!(subscription = id, "live subscriber gone");
                self.state().subscribers.remove(&id);
            }
        }
        delivered
    }

    /// Report a feed failure to every subscriber.
    pub async fn publish_error(&self, message: &str) {
        let targets: Vec<mpsc::Sender<Result<Bar>>> = self
            .state()
            .subscribers
            .values()
            .map(|sub| sub.sender.clone())
            .collect();

        for sender in targets {
            let _ = sender
                .send(Err(Error::DataUnavailable(message.to_string())))
                .await;
        }
    }

    /// Drop every subscription; receivers see the feed close.
    pub fn close(&self) {
        self.state().subscribers.clear();
    }
}

#[async_trait]
impl LiveDataProvider for LiveFeedHub {
    async fn subscribe(&self, symbols: &[String], buffer: usize) -> Result<LiveSubscription> {
        if symbols.is_empty() {
            return Err(Error::InvalidOperation(
                "live subscription needs at least one symbol".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(
            id,
            Subscriber {
                symbols: symbols.iter().map(|s| s.to_uppercase()).collect(),
                sender,
            },
        );
        debug!(subscription = id, symbols = ?symbols, "live subscription opened");

        Ok(LiveSubscription { id, receiver })
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        if self.state().subscribers.remove(&id).is_some() {
            debug!(subscription = id, "live subscription closed");
        }
        Ok(())
    }
}
