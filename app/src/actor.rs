//! One conversational actor: boot, listen, introduce, tick, say goodbye,
//! clean up.

use crate::bus::{self, Subscription};
use crate::config::ActorConfig;
use crate::dispatcher::{DeliveryReceipt, Dispatcher};
use crate::error::Error;
use crate::gc::GarbageCollector;
use crate::inbox::Admission;
use crate::manifest::ConversationManifest;
use crate::metrics::LIVE_ACTORS;
use crate::mood::{Mood, Topic};
use crate::scheduler::{Scheduler, SchedulerExit};
use crate::selector::ReplySelector;
use crate::state::ActorState;
use dispatch::{DeliveryKind, DispatchBackend, Event};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::*;

/// What an actor looked like when it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSummary {
    pub identity: String,
    pub mood: Mood,
    pub peers: Vec<String>,
    pub exit: SchedulerExit,
}

#[derive(Clone)]
pub struct Actor {
    config: ActorConfig,
    state: Arc<ActorState>,
    selector: ReplySelector,
    dispatcher: Dispatcher,
    gc: GarbageCollector,
}

impl Actor {
    pub fn boot(
        config: ActorConfig,
        manifest: &ConversationManifest,
        backend: Arc<dyn DispatchBackend>,
    ) -> Result<Self, Error> {
        Self::boot_with_rng(config, manifest, backend, &mut rand::thread_rng())
    }

    /// Validates configuration, picks a personality and draws a lifetime.
    /// Any error here is fatal for this actor.
    pub fn boot_with_rng<R: Rng + ?Sized>(
        config: ActorConfig,
        manifest: &ConversationManifest,
        backend: Arc<dyn DispatchBackend>,
        rng: &mut R,
    ) -> Result<Self, Error> {
        config.validate()?;
        let mood = config.initial_mood()?;
        let conversation = manifest.pick_personality(rng)?;
        conversation.require(&mood.required_topics())?;
        let lifetime = config.draw_lifetime(rng);

        info!(
            "{} wakes up {mood} and looks around (personality {}, leaves in {:?})",
            config.identity,
            conversation.label(),
            lifetime
        );

        let state = Arc::new(ActorState::new(
            config.identity.clone(),
            conversation,
            mood,
            Instant::now() + lifetime,
            config.seen_capacity,
        ));
        let dispatcher = Dispatcher::new(state.clone(), backend.clone(), config.namespace.clone());
        let gc = GarbageCollector::new(
            backend,
            &config.identity,
            &config.namespace,
            config.gc_page_size,
        );

        Ok(Self {
            selector: ReplySelector::new(state.clone()),
            config,
            state,
            dispatcher,
            gc,
        })
    }

    pub fn identity(&self) -> &str {
        self.state.identity()
    }

    pub fn state(&self) -> &Arc<ActorState> {
        &self.state
    }

    pub fn garbage_collector(&self) -> &GarbageCollector {
        &self.gc
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.state.clone(),
            self.selector.clone(),
            self.dispatcher.clone(),
            self.gc.clone(),
            self.config.tick_interval,
        )
    }

    /// Announces the actor to everyone on the bus.
    pub async fn introduce(&self) -> Result<DeliveryReceipt, Error> {
        let selection = self.selector.select_intro().await?;
        self.dispatcher.broadcast(&selection).await
    }

    /// Says goodbye to everyone, if the personality has something to say.
    pub async fn farewell(&self) -> Result<Option<DeliveryReceipt>, Error> {
        match self.selector.select_farewell().await {
            Ok(selection) => self.dispatcher.broadcast(&selection).await.map(Some),
            Err(Error::Configuration(reason)) => {
                debug!("{} leaves without a word: {reason}", self.identity());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Processes one inbound event. Returns the receipt of the reply, if any.
    pub async fn handle_event(&self, event: &Event) -> Result<Option<DeliveryReceipt>, Error> {
        match self.state.admit(&event.id, &event.source).await {
            Admission::Accept => {}
            Admission::Duplicate => {
                debug!("{} already heard {}", self.identity(), event.id);
                return Ok(None);
            }
            Admission::OwnEvent => return Ok(None),
        }

        let Some(topic) = Topic::from_event_type(&event.kind) else {
            debug!(
                "{} ignores {} from {}: unknown event type",
                self.identity(),
                event.kind,
                event.source
            );
            return Ok(None);
        };

        info!(
            "{} hears {} ({}) say {:?}",
            self.identity(),
            event.source,
            event.mood().unwrap_or("unknown mood"),
            event.data.message
        );
        self.state.observe_topic(topic).await;

        // answering replies would make two actors talk forever
        if event.delivery_kind() == Some(DeliveryKind::Reply) {
            return Ok(None);
        }

        let selection = self.selector.select_reply(topic).await?;
        self.dispatcher
            .reply_to_peer(&event.source, &selection)
            .await
            .map(Some)
    }

    async fn receive_loop(&self, mut subscription: Subscription) {
        loop {
            let event = match subscription.recv().await {
                Err(RecvError::Lagged(x)) => {
                    warn!("{} missed {x} events", self.identity());
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("{} stops listening: bus closed", self.identity());
                    break;
                }
                Ok(event) => event,
            };

            match self.handle_event(&event).await {
                Ok(_) => {}
                Err(Error::NoPeersKnown) => {
                    debug!("{} could not answer {}: no peers", self.identity(), event.id);
                }
                Err(err) => {
                    error!("{} failed to answer {}: {err}", self.identity(), event.id);
                }
            }
        }
    }

    /// Forced collection, page after page, until a pass has nothing left to
    /// delete. Stops early when a pass makes no progress.
    async fn collect_all(&self) {
        loop {
            let report = match self.gc.collect(true).await {
                Ok(report) => report,
                Err(_) => return,
            };
            if report.deleted > 0 {
                continue;
            }
            if report.failed > 0 {
                warn!(
                    "{} left {} deliveries behind",
                    self.identity(),
                    report.failed
                );
            }
            return;
        }
    }

    /// Waits out the wake-up delay. Returns false if shutdown arrived first.
    async fn wake_up(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.config.wake_up_delay.is_zero() {
            return true;
        }
        let delay = tokio::time::sleep(self.config.wake_up_delay);
        tokio::pin!(delay);

        loop {
            if *shutdown.borrow() {
                return false;
            }
            tokio::select! {
                _ = &mut delay => return true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn finish(&self, exit: SchedulerExit) -> ActorSummary {
        self.collect_all().await;
        LIVE_ACTORS.dec();

        let summary = ActorSummary {
            identity: self.identity().to_string(),
            mood: self.state.mood().await,
            peers: self.state.peers().await,
            exit,
        };
        info!(
            "{} is done ({:?}), {} and knew {:?}",
            summary.identity, summary.exit, summary.mood, summary.peers
        );
        summary
    }

    /// Runs the actor to the end of its life or until `shutdown` flips.
    pub async fn run(
        self,
        bus: bus::Client,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ActorSummary, Error> {
        LIVE_ACTORS.inc();

        if !self.wake_up(&mut shutdown).await {
            info!("{} was told to stop before waking up", self.identity());
            return Ok(self.finish(SchedulerExit::Shutdown).await);
        }

        // clear the lane
        self.collect_all().await;

        let subscription = match bus.subscribe(self.identity()).await {
            Ok(subscription) => subscription,
            Err(err) => {
                LIVE_ACTORS.dec();
                return Err(err.into());
            }
        };
        let listener = self.clone();
        let receive_loop = tokio::spawn(
            async move { listener.receive_loop(subscription).await }.in_current_span(),
        );

        if let Err(err) = self.introduce().await {
            warn!("{} had a problem introducing themself: {err}", self.identity());
        }

        let exit = self.scheduler().run(shutdown).await;

        if let Err(err) = self.farewell().await {
            warn!("{} could not say goodbye: {err}", self.identity());
        }
        receive_loop.abort();
        Ok(self.finish(exit).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::spawn_event_bus;
    use crate::manifest::{manifest_value_parser, Conversation, Exchange};
    use async_trait::async_trait;
    use dispatch::{DeliverySpec, DeliveryStatus, LabelSelector, LocalBackend};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn manifest() -> ConversationManifest {
        ConversationManifest {
            conversations: vec![Conversation {
                name: Some("terse".to_string()),
                hello: vec![Exchange::new("hi", "hey")],
                conversation: vec![Exchange::new("how are you", "fine")],
                shiny: vec![Exchange::new("ooh", "so shiny")],
                ..Default::default()
            }],
        }
    }

    fn event(id: &str, source: &str, topic: Topic, kind: Option<DeliveryKind>) -> Event {
        let mut extensions = BTreeMap::new();
        if let Some(kind) = kind {
            extensions.insert(dispatch::EXT_KIND.to_string(), kind.as_ref().to_string());
        }
        Event {
            id: id.to_string(),
            kind: topic.event_type(),
            source: source.to_string(),
            subject: "alice".to_string(),
            extensions,
            data: Default::default(),
        }
    }

    fn boot(config: ActorConfig) -> (Actor, LocalBackend) {
        let backend = LocalBackend::detached();
        let actor = Actor::boot(config, &manifest(), Arc::new(backend.clone())).unwrap();
        (actor, backend)
    }

    #[test]
    fn boot_rejects_missing_mood_topic() {
        let mut config = ActorConfig::new("alice");
        config.angry = true;
        let err = Actor::boot(config, &manifest(), Arc::new(LocalBackend::detached()))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn boot_rejects_empty_manifest() {
        let err = Actor::boot(
            ActorConfig::new("alice"),
            &ConversationManifest::default(),
            Arc::new(LocalBackend::detached()),
        )
        .err()
        .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn boot_with_dev_manifest_in_every_mood() {
        let manifest = manifest_value_parser("dev").unwrap();
        for (asleep, angry) in [(false, false), (true, false), (false, true)] {
            let mut config = ActorConfig::new("alice");
            config.asleep = asleep;
            config.angry = angry;
            let actor =
                Actor::boot(config, &manifest, Arc::new(LocalBackend::detached())).unwrap();
            assert!(actor.introduce().await.is_ok());
        }
    }

    #[tokio::test]
    async fn replies_are_never_answered() {
        let (actor, backend) = boot(ActorConfig::new("alice"));
        let reply = event("1", "bob", Topic::Conversation, Some(DeliveryKind::Reply));
        assert_eq!(actor.handle_event(&reply).await.unwrap(), None);
        assert_eq!(actor.state().peers().await, vec!["bob"]);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn distraction_entrances_and_is_answered_shinily() {
        let (actor, backend) = boot(ActorConfig::new("alice"));
        let shiny = event("1", "magpie", Topic::Shiny, Some(DeliveryKind::Utterance));
        let receipt = actor.handle_event(&shiny).await.unwrap().unwrap();
        assert_eq!(receipt.topic, Topic::Shiny);
        assert_eq!(actor.state().mood().await, Mood::Entranced);

        let hello = event("2", "bob", Topic::Hello, None);
        let receipt = actor.handle_event(&hello).await.unwrap().unwrap();
        assert_eq!(receipt.topic, Topic::Shiny);
        assert_eq!(actor.state().mood().await, Mood::Entranced);

        let messages: Vec<String> = backend
            .deliveries()
            .await
            .into_iter()
            .map(|d| d.spec.message)
            .collect();
        assert_eq!(messages, vec!["so shiny", "so shiny"]);
    }

    #[tokio::test]
    async fn unknown_event_types_only_record_the_peer() {
        let (actor, backend) = boot(ActorConfig::new("alice"));
        let mut odd = event("1", "bob", Topic::Hello, None);
        odd.kind = "com.example.unrelated".to_string();
        assert_eq!(actor.handle_event(&odd).await.unwrap(), None);
        assert_eq!(actor.state().peers().await, vec!["bob"]);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn mirrored_topic_without_exchanges_is_reported() {
        let (actor, backend) = boot(ActorConfig::new("alice"));
        let goodbye = event("1", "bob", Topic::Goodbye, None);
        assert!(matches!(
            actor.handle_event(&goodbye).await,
            Err(Error::Configuration(_))
        ));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn farewell_without_goodbye_lines_is_silent() {
        let (actor, backend) = boot(ActorConfig::new("alice"));
        assert_eq!(actor.farewell().await.unwrap(), None);
        assert!(backend.is_empty().await);
    }

    fn leftover(sender: &str) -> DeliverySpec {
        DeliverySpec {
            namespace: "default".to_string(),
            sender: sender.to_string(),
            recipient: "all".to_string(),
            topic: "hello".to_string(),
            event_type: Topic::Hello.event_type(),
            mood: "neutral".to_string(),
            kind: DeliveryKind::Utterance,
            message: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn cleanup_spans_several_pages() {
        let mut config = ActorConfig::new("alice");
        config.gc_page_size = 2;
        let (actor, backend) = boot(config);
        for _ in 0..5 {
            backend.create_delivery(leftover("alice")).await.unwrap();
        }
        backend.create_delivery(leftover("bob")).await.unwrap();

        let (_tx, rx) = watch::channel(true);
        let summary = actor.run(spawn_event_bus(16), rx).await.unwrap();
        assert_eq!(summary.exit, SchedulerExit::Shutdown);

        let left = backend.deliveries().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].spec.sender, "bob");
    }

    /// Lists like the inner backend but never deletes anything.
    struct Undeletable(LocalBackend);

    #[async_trait]
    impl DispatchBackend for Undeletable {
        async fn create_delivery(&self, spec: DeliverySpec) -> Result<String, dispatch::Error> {
            self.0.create_delivery(spec).await
        }

        async fn list_deliveries(
            &self,
            selector: &LabelSelector,
            limit: usize,
        ) -> Result<Vec<DeliveryStatus>, dispatch::Error> {
            self.0.list_deliveries(selector, limit).await
        }

        async fn delete_delivery(&self, id: &str) -> Result<(), dispatch::Error> {
            Err(dispatch::Error::Rejected(format!("{id} is pinned")))
        }
    }

    #[tokio::test]
    async fn cleanup_stops_when_nothing_can_be_deleted() {
        let inner = LocalBackend::detached();
        let mut config = ActorConfig::new("alice");
        config.gc_page_size = 2;
        let actor = Actor::boot(
            config,
            &manifest(),
            Arc::new(Undeletable(inner.clone())),
        )
        .unwrap();
        for _ in 0..3 {
            inner.create_delivery(leftover("alice")).await.unwrap();
        }

        actor.collect_all().await;
        assert_eq!(inner.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_wake_up_skips_the_conversation() {
        let bus = spawn_event_bus(16);
        let backend = LocalBackend::new(Arc::new(bus.clone()));
        let mut bob = bus.subscribe("bob").await.unwrap();

        let mut config = ActorConfig::new("alice");
        config.wake_up_delay = Duration::from_secs(10);
        let actor = Actor::boot(config, &manifest(), Arc::new(backend.clone())).unwrap();

        let started = Instant::now();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(actor.run(bus.clone(), rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.exit, SchedulerExit::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(backend.is_empty().await);
        assert!(
            tokio::time::timeout(Duration::from_secs(1), bob.recv())
                .await
                .is_err()
        );
    }
}
