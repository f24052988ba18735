//! # irpad Host Demo
//!
//! Runs the link core on a desktop machine against [`sim::SimulatedService`]:
//!
//! - Loads [`LinkConfig`] from JSON and applies command-line overrides
//! - Allocates and registers the shared region
//! - Ticks the [`StatePublisher`] on a fixed interval
//! - Feeds operator actions from stdin or a timed [`input::Script`]
//! - Prints each new snapshot and event, then a JSON status report on exit
//!
//! ## Tick Loop
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 tokio current-thread runtime              │
//! │                                                           │
//! │  interval(tick_ms) ──► action? ──► publisher.tick(action) │
//! │        ▲                  ▲                │              │
//! │        │          script / stdin           ▼              │
//! │        └──────────────────────────── print events,        │
//! │                                      new snapshot         │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use irpad_shared::buffer::{BufferError, PageBuffer};
use irpad_shared::channel::ChannelStats;
use irpad_shared::config::{ConfigError, LinkConfig};
use irpad_shared::protocol::TelemetryPacket;
use irpad_shared::publisher::{LinkStats, OperatorAction, PublisherOutcome, StatePublisher};
use irpad_shared::session::{SessionError, TransportSession};

pub mod console;
pub mod input;
pub mod sim;

use console::{render_event, render_snapshot, StatusReport};
use input::Script;
use sim::{SimConfig, SimulatedService};

/// Errors that end the demo
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session error: {0}")]
    Session(SessionError),
}

impl From<SessionError> for DemoError {
    fn from(e: SessionError) -> Self {
        DemoError::Session(e)
    }
}

impl From<BufferError> for DemoError {
    fn from(e: BufferError) -> Self {
        DemoError::Session(e.into())
    }
}

impl From<ConfigError> for DemoError {
    fn from(e: ConfigError) -> Self {
        DemoError::Config(e.to_string())
    }
}

/// Read a JSON link config; missing fields keep their defaults
pub fn load_config(path: Option<&Path>) -> Result<LinkConfig, DemoError> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let config: LinkConfig = serde_json::from_str(&text)?;
            info!("Loaded config from {}", path.display());
            config
        }
        None => LinkConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub link: LinkConfig,
    pub sim: SimConfig,
    pub tick_ms: u64,
    pub script: Script,
    /// Cancel on our own after this long
    pub run_for_ms: Option<u64>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            sim: SimConfig::default(),
            tick_ms: 16,
            script: Script::default(),
            run_for_ms: None,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: PublisherOutcome,
    pub link: LinkStats,
    pub channel: ChannelStats,
    pub last_snapshot: Option<TelemetryPacket>,
    pub packets_written: u32,
}

/// Drive the publisher until the operator cancels
///
/// `input` is polled once per tick; when it closes only the script and
/// `run_for_ms` can end the run.
pub async fn run<W: Write>(
    options: DemoOptions,
    mut input: Option<mpsc::Receiver<OperatorAction>>,
    out: &mut W,
) -> Result<RunSummary, DemoError> {
    let DemoOptions {
        link,
        sim,
        tick_ms,
        mut script,
        run_for_ms,
    } = options;
    link.validate()?;
    if tick_ms == 0 {
        return Err(DemoError::Config("tick_ms must be non-zero".into()));
    }

    let buffer = PageBuffer::new(link.geometry())?;
    let session = TransportSession::open(SimulatedService::new(sim), buffer)?;
    let disconnect_timeout_ms = link.disconnect_timeout_ms;
    let mut publisher = StatePublisher::new(session, link);

    writeln!(out, "irpad demo {}. Commands: retry, quit, status, role.", irpad_shared::VERSION)?;

    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let started = Instant::now();
    let mut published = 0;

    let outcome = loop {
        interval.tick().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut action = script.due(elapsed_ms);
        if action.is_none() {
            action = poll_input(&mut input);
        }
        if action.is_none() && run_for_ms.is_some_and(|limit| elapsed_ms >= limit) {
            info!("Run time of {} ms reached", elapsed_ms);
            action = Some(OperatorAction::Cancel);
        }
        if let Some(action) = action {
            info!("Operator: {:?}", action);
        }

        let outcome = publisher.tick(action);

        while let Some(event) = publisher.take_event() {
            writeln!(out, "{}", render_event(&event))?;
        }
        let stats = publisher.stats();
        if stats.published != published {
            published = stats.published;
            if let Some(snapshot) = publisher.snapshot() {
                writeln!(out, "{}", render_snapshot(snapshot))?;
            }
        }

        if outcome == PublisherOutcome::Cancelled {
            break outcome;
        }
    };

    let report = StatusReport::collect(&publisher);
    writeln!(out, "{}", report.to_json()?)?;

    let summary = RunSummary {
        outcome,
        link: publisher.stats(),
        channel: publisher.channel_stats(),
        last_snapshot: publisher.snapshot().copied(),
        packets_written: publisher.session().service().packets_written(),
    };

    let (_, buffer) = publisher.into_session().close(disconnect_timeout_ms);
    if buffer.is_none() {
        warn!("Service kept the shared region");
    }
    Ok(summary)
}

fn poll_input(input: &mut Option<mpsc::Receiver<OperatorAction>>) -> Option<OperatorAction> {
    let rx = input.as_mut()?;
    match rx.try_recv() {
        Ok(action) => Some(action),
        Err(mpsc::error::TryRecvError::Empty) => None,
        Err(mpsc::error::TryRecvError::Disconnected) => {
            info!("Operator input closed");
            *input = None;
            None
        }
    }
}
