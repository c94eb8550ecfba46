use crate::dispatcher::{DeliveryReceipt, Dispatcher};
use crate::error::Error;
use crate::gc::GarbageCollector;
use crate::selector::ReplySelector;
use crate::state::ActorState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::*;

/// Why the tick loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    Deadline,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Sent(DeliveryReceipt),
    /// Nobody to talk to yet
    Idle,
    Failed(Error),
}

/// Drives self-initiated conversation until the actor's lifetime runs out
/// or it is told to stop.
pub struct Scheduler {
    state: Arc<ActorState>,
    selector: ReplySelector,
    dispatcher: Dispatcher,
    gc: GarbageCollector,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        state: Arc<ActorState>,
        selector: ReplySelector,
        dispatcher: Dispatcher,
        gc: GarbageCollector,
        tick_interval: Duration,
    ) -> Self {
        Self {
            state,
            selector,
            dispatcher,
            gc,
            tick_interval,
        }
    }

    /// The first tick fires one interval after start. In-flight sends are
    /// never cancelled, only future ticks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerExit {
        let deadline = tokio::time::sleep_until(self.state.lifetime_deadline());
        tokio::pin!(deadline);

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if *shutdown.borrow() {
            return SchedulerExit::Shutdown;
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // a dropped sender means nobody can keep us alive either
                    if changed.is_err() || *shutdown.borrow() {
                        info!("{} stops ticking: shutdown", self.state.identity());
                        return SchedulerExit::Shutdown;
                    }
                }
                _ = &mut deadline => {
                    info!("{} stops ticking: lifetime is over", self.state.identity());
                    return SchedulerExit::Deadline;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass: collect finished deliveries, then maybe start a conversation.
    pub async fn tick(&self) -> TickOutcome {
        // failures are logged by the collector; a tick goes on regardless
        let _ = self.gc.collect(false).await;

        match self.self_initiate().await {
            Ok(receipt) => TickOutcome::Sent(receipt),
            Err(Error::NoPeersKnown) => {
                debug!("{} has nobody to talk to yet", self.state.identity());
                TickOutcome::Idle
            }
            Err(err) => {
                warn!("{} failed to start a conversation: {err}", self.state.identity());
                TickOutcome::Failed(err)
            }
        }
    }

    async fn self_initiate(&self) -> Result<DeliveryReceipt, Error> {
        let mood = self.state.mood().await;
        if mood.self_initiation_is_peer_directed() {
            if !self.state.has_peers().await {
                return Err(Error::NoPeersKnown);
            }
            let selection = self.selector.select_self_initiated().await?;
            self.dispatcher.speak_to_peer(&selection).await
        } else {
            let selection = self.selector.select_self_initiated().await?;
            self.dispatcher.broadcast(&selection).await
        }
    }
}
