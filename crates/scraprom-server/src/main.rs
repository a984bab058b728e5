mod feed;

use clap::Parser;
use scraprom_common::{DeliveryMode, PushMethod, ScrapromConfig};
use scraprom_lifecycle::{PromStatsCollector, WorkSignals};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scraprom",
    about = "Exports stats events read from stdin as Prometheus metrics"
)]
struct Cli {
    /// push or pull
    #[arg(long)]
    delivery: Option<String>,

    #[arg(long)]
    pushgateway_url: Option<String>,

    #[arg(long)]
    job_name: Option<String>,

    /// post or put
    #[arg(long)]
    push_method: Option<String>,

    #[arg(long)]
    push_timeout: Option<f64>,

    #[arg(long)]
    update_interval: Option<f64>,

    #[arg(long)]
    metric_prefix: Option<String>,

    #[arg(long)]
    bind_host: Option<String>,

    #[arg(long)]
    bind_port: Option<u16>,

    #[arg(long)]
    metrics_path: Option<String>,

    /// Keep delivering after stdin closes, until Ctrl-C.
    #[arg(long, default_value_t = false)]
    hold: bool,
}

impl Cli {
    fn apply(&self, config: &mut ScrapromConfig) -> scraprom_common::Result<()> {
        if let Some(value) = self.delivery.as_deref() {
            config.delivery = DeliveryMode::parse(value)?;
        }
        if let Some(value) = self.push_method.as_deref() {
            config.push_method = PushMethod::parse(value)?;
        }
        if let Some(value) = &self.pushgateway_url {
            config.pushgateway_url = value.clone();
        }
        if let Some(value) = &self.job_name {
            config.job_name = value.clone();
        }
        if let Some(value) = self.push_timeout {
            config.push_timeout_secs = value;
        }
        if let Some(value) = self.update_interval {
            config.update_interval_secs = value;
        }
        if let Some(value) = &self.metric_prefix {
            config.metric_prefix = value.clone();
        }
        if let Some(value) = &self.bind_host {
            config.bind_host = value.clone();
        }
        if let Some(value) = self.bind_port {
            config.bind_port = value;
        }
        if let Some(value) = &self.metrics_path {
            config.metrics_path = value.clone();
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("scraprom=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ScrapromConfig::from_env()?;
    cli.apply(&mut config)?;

    let signals = WorkSignals::new();
    let collector = PromStatsCollector::new(config, &signals)?;
    let stats = collector.stats();

    signals.emit_started().await?;
    if let Some(addr) = collector.controller().local_addr().await {
        info!("scraprom serving metrics on {addr}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    let mut line_number = 0_u64;
    loop {
        let raw = match lines.next_segment().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "stats input failed");
                break;
            }
        };
        line_number += 1;

        let applied = feed::decode_line(raw).and_then(|line| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(());
            }
            feed::parse_line(line).and_then(|event| feed::apply(&stats, event))
        });
        if let Err(err) = applied {
            warn!(line = line_number, error = %err, "stats event rejected");
        }
    }
    info!(events = line_number, "stats input closed");

    if cli.hold {
        info!("holding metrics delivery until interrupted");
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "waiting for interrupt failed");
        }
    }

    signals.emit_stopped().await;
    Ok(())
}
