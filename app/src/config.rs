//! Per-actor configuration, resolved once before boot.

use crate::error::Error;
use crate::mood::Mood;
use dispatch::BROADCAST_RECIPIENT;
use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_MIN_LIFETIME: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(300);
pub const DEFAULT_GC_PAGE_SIZE: usize = 100;
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorConfig {
    pub identity: String,
    pub asleep: bool,
    pub angry: bool,
    /// Label scope of the deliveries this actor may collect
    pub namespace: String,
    pub tick_interval: Duration,
    pub min_lifetime: Duration,
    pub max_lifetime: Duration,
    pub gc_page_size: usize,
    /// Bounds the dedup set; `None` keeps every id for the actor's lifetime
    pub seen_capacity: Option<usize>,
    /// Pause before the actor starts listening and talking
    pub wake_up_delay: Duration,
}

impl ActorConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            asleep: false,
            angry: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            min_lifetime: DEFAULT_MIN_LIFETIME,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            gc_page_size: DEFAULT_GC_PAGE_SIZE,
            seen_capacity: None,
            wake_up_delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.identity.trim().is_empty() {
            return Err(Error::configuration("actor identity is empty"));
        }
        if self.identity == BROADCAST_RECIPIENT {
            return Err(Error::configuration(format!(
                "`{BROADCAST_RECIPIENT}` is reserved for broadcasts"
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::configuration("tick interval must be positive"));
        }
        if self.min_lifetime > self.max_lifetime {
            return Err(Error::configuration(format!(
                "lifetime range is inverted: {:?} > {:?}",
                self.min_lifetime, self.max_lifetime
            )));
        }
        if self.gc_page_size == 0 {
            return Err(Error::configuration("gc page size must be positive"));
        }
        if self.seen_capacity == Some(0) {
            return Err(Error::configuration("seen-event capacity must be positive"));
        }
        Mood::initial(self.asleep, self.angry)?;
        Ok(())
    }

    pub fn initial_mood(&self) -> Result<Mood, Error> {
        Mood::initial(self.asleep, self.angry)
    }

    pub fn lifetime_range(&self) -> RangeInclusive<Duration> {
        self.min_lifetime..=self.max_lifetime
    }

    /// Draws how long this actor lives; staggered so a population does not
    /// exit all at once.
    pub fn draw_lifetime<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min_lifetime == self.max_lifetime {
            return self.min_lifetime;
        }
        rng.gen_range(self.lifetime_range())
    }
}
