//! Delivers a single event through the broker pipeline.
//!
//! Loads a routing snapshot and a structured-mode event from JSON files, runs
//! fanout (unless `--target` is given), filter and delivery once, and prints
//! any event handed to a retry topic as a JSON line on stdout.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use cebroker_core::routing::target_key;
use cebroker_core::{Encoding, Event, Targets};
use cebroker_delivery::config::{DeliveryArgs, DeliveryConfig, TransportConfig};
use cebroker_delivery::processors::{DeliverProcessor, FanoutProcessor, FilterProcessor, Next, ProcessContext, Processor};
use cebroker_delivery::telemetry::{init_tracing, LogFormat};
use cebroker_delivery::{ChannelRetryPublisher, DeliveryEngine, HttpTransport, MetricsReporter, TargetsHandle};
use clap::Parser;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum WireEncoding {
    #[default]
    Binary,
    Structured,
}

impl From<WireEncoding> for Encoding {
    fn from(value: WireEncoding) -> Self {
        match value {
            WireEncoding::Binary => Encoding::Binary,
            WireEncoding::Structured => Encoding::Structured,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "deliver-once", version, about)]
struct Cli {
    /// Routing snapshot with `brokers` and `targets` arrays.
    #[arg(long, env = "TARGETS_CONFIG")]
    targets: PathBuf,

    /// Event in CloudEvents structured JSON form.
    #[arg(long)]
    event: PathBuf,

    /// Broker the event arrived on, as `namespace/name`.
    #[arg(long)]
    broker: String,

    /// Deliver to this target name only, skipping fanout.
    #[arg(long)]
    target: Option<String>,

    /// Encoding used for the target dispatch.
    #[arg(long, value_enum, default_value_t)]
    encoding: WireEncoding,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t)]
    log_format: LogFormat,

    #[command(flatten)]
    delivery: DeliveryArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = DeliveryConfig::from(cli.delivery);
    config.validate()?;

    let raw = tokio::fs::read_to_string(&cli.targets)
        .await
        .with_context(|| format!("failed to read {}", cli.targets.display()))?;
    let targets = Targets::from_json(&raw).context("invalid targets snapshot")?;
    let raw = tokio::fs::read(&cli.event)
        .await
        .with_context(|| format!("failed to read {}", cli.event.display()))?;
    let event: Event = serde_json::from_slice(&raw).context("invalid event")?;
    info!(
        brokers = targets.broker_count(),
        targets = targets.target_count(),
        event_id = %event.id,
        "loaded snapshot and event"
    );

    let handle = Arc::new(TargetsHandle::new(targets));
    let transport = HttpTransport::from_config(&TransportConfig::default())?;
    let (publisher, mut retries) = ChannelRetryPublisher::new(64, Duration::from_secs(5));
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(record) = retries.recv().await {
            serde_json::to_writer(&mut stdout, &record)?;
            writeln!(stdout)?;
        }
        stdout.flush()?;
        Ok::<_, anyhow::Error>(())
    });

    let engine = DeliveryEngine::new(
        Arc::clone(&handle),
        Arc::new(transport),
        Arc::new(MetricsReporter),
        Arc::new(publisher),
        config,
    );
    let deliver: Arc<dyn Processor> = Arc::new(DeliverProcessor::new(Arc::new(engine)));
    let filter: Arc<dyn Processor> =
        Arc::new(FilterProcessor::new(Arc::clone(&handle)).with_next(Next::new(deliver)));

    let mut ctx = ProcessContext::new(cli.broker.clone()).with_encoding(cli.encoding.into());
    let head: Arc<dyn Processor> = match &cli.target {
        Some(name) => {
            let (namespace, broker) = cli
                .broker
                .split_once('/')
                .context("--broker must be namespace/name")?;
            ctx = ctx.for_target(target_key(namespace, broker, name));
            filter
        }
        None => Arc::new(FanoutProcessor::new(handle).with_next(Next::new(filter))),
    };

    let result = head.process(&event, &ctx).await;
    // The chain owns the publisher; dropping it lets the printer drain and exit.
    drop(head);
    printer.await.context("retry printer panicked")??;
    result?;
    info!("delivery finished");
    Ok(())
}
