use crate::actor::{Actor, ActorSummary};
use crate::bus::{self, spawn_event_bus};
use crate::config::{
    ActorConfig, DEFAULT_GC_PAGE_SIZE, DEFAULT_MAX_LIFETIME, DEFAULT_MIN_LIFETIME,
    DEFAULT_NAMESPACE, DEFAULT_TICK_INTERVAL,
};
use crate::manifest::{manifest_value_parser, ConversationManifest};
use crate::mood::{Mood, Topic};
use clap::Parser;
use dispatch::{DeliveryKind, DeliverySpec, DispatchBackend, LocalBackend, BROADCAST_RECIPIENT};
use eyre::Result;
use futures::pin_mut;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use std::{future::Future, sync::Arc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Sender of the injected distraction. Not an actor, so nobody answers it
/// back into the void for long.
pub const DISTRACTION_SOURCE: &str = "magpie";

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

#[derive(Parser)]
#[command(author, about = "CHATTER", long_about = None)]
pub struct App {
    /// Identities of the actors to run in this process
    #[arg(
        long = "names",
        env = "CHATTER_NAMES",
        value_delimiter = ',',
        required = true
    )]
    pub names: Vec<String>,

    #[arg(
        long = "messages",
        env = "MESSAGES_DATA",
        value_name = "DEV_OR_JSON_OR_PATH",
        value_parser = manifest_value_parser,
        default_value = "dev"
    )]
    manifest: ConversationManifest,

    /// Actors that start asleep
    #[arg(long, env = "ACTOR_ASLEEP", value_delimiter = ',')]
    pub asleep: Vec<String>,

    /// Actors that start angry
    #[arg(long, env = "ACTOR_ANGRY", value_delimiter = ',')]
    pub angry: Vec<String>,

    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long = "tick-interval-secs", default_value_t = DEFAULT_TICK_INTERVAL.as_secs())]
    pub tick_interval_secs: u64,

    #[arg(long = "min-lifetime-secs", default_value_t = DEFAULT_MIN_LIFETIME.as_secs())]
    pub min_lifetime_secs: u64,

    #[arg(long = "max-lifetime-secs", default_value_t = DEFAULT_MAX_LIFETIME.as_secs())]
    pub max_lifetime_secs: u64,

    #[arg(long = "wake-up-delay-secs", default_value_t = 0)]
    pub wake_up_delay_secs: u64,

    #[arg(long = "gc-page-size", default_value_t = DEFAULT_GC_PAGE_SIZE)]
    pub gc_page_size: usize,

    /// Bound on remembered event ids per actor; unbounded when absent
    #[arg(long = "seen-capacity")]
    pub seen_capacity: Option<usize>,

    #[arg(long = "bus-capacity", default_value_t = bus::DEFAULT_CAPACITY)]
    pub bus_capacity: usize,

    /// Publish every event twice, the way an at-least-once transport may
    #[arg(long = "at-least-once", default_value_t = false)]
    pub at_least_once: bool,

    /// Broadcast something shiny this many seconds after start
    #[arg(long = "distract-after-secs")]
    pub distract_after_secs: Option<u64>,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    #[clap(long, help = "Port for the metrics server")]
    pub metrics_port: Option<u16>,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(self.execute())?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = Level::from_str(
            std::env::var("RUST_LOG")
                .unwrap_or("info".to_string())
                .as_str(),
        )
        .unwrap_or(Level::INFO);

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("chatter={rust_log_level},dispatch={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer().with_target(true);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    /// One validated config per actor, in the order the names were given.
    pub fn actor_configs(&self) -> Result<Vec<ActorConfig>> {
        let mut unique = HashSet::new();
        let mut configs = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let name = name.trim();
            if !unique.insert(name) {
                eyre::bail!("actor {name} is listed twice");
            }
            let config = ActorConfig {
                asleep: self.asleep.iter().any(|n| n.trim() == name),
                angry: self.angry.iter().any(|n| n.trim() == name),
                namespace: self.namespace.clone(),
                tick_interval: Duration::from_secs(self.tick_interval_secs),
                min_lifetime: Duration::from_secs(self.min_lifetime_secs),
                max_lifetime: Duration::from_secs(self.max_lifetime_secs),
                wake_up_delay: Duration::from_secs(self.wake_up_delay_secs),
                gc_page_size: self.gc_page_size,
                seen_capacity: self.seen_capacity,
                ..ActorConfig::new(name)
            };
            config.validate()?;
            configs.push(config);
        }
        Ok(configs)
    }

    async fn execute(self) -> Result<()> {
        let configs = self.actor_configs()?;

        if self.metrics_port.is_some() {
            crate::metrics::start_server(self.metrics_port).await;
        }

        let bus = spawn_event_bus(self.bus_capacity);
        let backend = LocalBackend::new(Arc::new(bus.clone()))
            .with_duplicate_publishes(self.at_least_once);

        // boot everyone first so a bad manifest fails before anyone talks
        let mut actors = Vec::with_capacity(configs.len());
        for config in configs {
            actors.push(Actor::boot(
                config,
                &self.manifest,
                Arc::new(backend.clone()),
            )?);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles: Vec<JoinHandle<_>> = actors
            .into_iter()
            .map(|actor| {
                let span = info_span!("actor", name = %actor.identity());
                tokio::spawn(
                    actor
                        .run(bus.clone(), shutdown_rx.clone())
                        .instrument(span),
                )
            })
            .collect();

        if let Some(secs) = self.distract_after_secs {
            let backend = backend.clone();
            let namespace = self.namespace.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if let Err(err) = distract(&backend, &namespace).await {
                    warn!("Could not distract anyone: {err}");
                }
            });
        }

        let population = futures::future::join_all(handles);
        let results = run_until_ctrl_c(population, shutdown_tx).await?;

        let mut summaries = Vec::new();
        for result in results {
            match result {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(err)) => error!("Actor stopped with an error: {err}"),
                Err(err) => error!("Actor task failed: {err}"),
            }
        }
        report(&summaries);

        Ok(())
    }
}

/// Broadcasts a `shiny` event from [`DISTRACTION_SOURCE`]; every actor that
/// hears it becomes entranced.
pub async fn distract(backend: &dyn DispatchBackend, namespace: &str) -> Result<String> {
    let id = backend
        .create_delivery(DeliverySpec {
            namespace: namespace.to_string(),
            sender: DISTRACTION_SOURCE.to_string(),
            recipient: BROADCAST_RECIPIENT.to_string(),
            topic: Topic::Shiny.to_string(),
            event_type: Topic::Shiny.event_type(),
            mood: Mood::Entranced.to_string(),
            kind: DeliveryKind::Utterance,
            message: "Look over there!".to_string(),
        })
        .await?;
    info!("{DISTRACTION_SOURCE} flashes something shiny ({id})");
    Ok(id)
}

fn report(summaries: &[ActorSummary]) {
    for summary in summaries {
        info!(
            "{}: {} after {:?}, talked to {}",
            summary.identity,
            summary.mood,
            summary.exit,
            if summary.peers.is_empty() {
                "nobody".to_string()
            } else {
                summary.peers.join(", ")
            }
        );
    }
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

/// Drives `fut` to completion. On ctrl-c or SIGTERM the shutdown flag is
/// raised first so actors can say goodbye and collect their deliveries.
async fn run_until_ctrl_c<F>(fut: F, shutdown: watch::Sender<bool>) -> Result<F::Output, std::io::Error>
where
    F: Future,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = &mut fut => return Ok(res),
    }

    let _ = shutdown.send(true);
    Ok(fut.await)
}
