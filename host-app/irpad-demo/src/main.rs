//! irpad-demo - pair with the emulated infrared accessory and print its telemetry

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use irpad_demo::input::{spawn_stdin_reader, Script};
use irpad_demo::sim::SimConfig;
use irpad_demo::{load_config, run, DemoError, DemoOptions};

/// irpad demo - infrared accessory link over a simulated service
#[derive(Parser, Debug)]
#[command(name = "irpad-demo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON link configuration; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wait for 'retry' after a lost link instead of reconnecting
    #[arg(long)]
    manual_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Display tick in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Timed commands, e.g. "500:status,1000:role,3000:quit"
    #[arg(long)]
    script: Option<String>,

    /// Time for the emulated accessory to answer a connect request
    #[arg(long, default_value = "40")]
    accessory_delay_ms: u64,

    /// Drop every link after this many milliseconds
    #[arg(long)]
    drop_link_after_ms: Option<u64>,

    /// Connect requests the service answers with busy first
    #[arg(long, default_value = "0")]
    busy_replies: u8,

    /// Stop on our own after this many milliseconds
    #[arg(long)]
    run_for_ms: Option<u64>,

    /// Ignore stdin; only the script and --run-for-ms end the run
    #[arg(long)]
    no_stdin: bool,
}

impl Cli {
    fn options(&self) -> Result<DemoOptions, DemoError> {
        let mut link = load_config(self.config.as_deref())?;
        if self.manual_reconnect {
            link.auto_reconnect = false;
        }

        let script = match &self.script {
            Some(text) => Script::parse(text)?,
            None => Script::default(),
        };

        Ok(DemoOptions {
            link,
            sim: SimConfig {
                accessory_delay_ms: self.accessory_delay_ms,
                drop_link_after_ms: self.drop_link_after_ms,
                busy_replies: self.busy_replies,
            },
            tick_ms: self.tick_ms,
            script,
            run_for_ms: self.run_for_ms,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("irpad demo {}", irpad_shared::VERSION);

    let options = match cli.options() {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let input = (!cli.no_stdin).then(spawn_stdin_reader);

    let mut stdout = std::io::stdout();
    match run(options, input, &mut stdout).await {
        Ok(summary) => {
            info!(
                "Finished: {} snapshots, {} reconnects, {} corrupt packets",
                summary.link.published, summary.link.reconnects, summary.channel.corrupt
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
