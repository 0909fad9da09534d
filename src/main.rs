use anyhow::{bail, Context};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use reqwest::Url;
use sensor_injector::app::ports::SensorThingsPort;
use sensor_injector::config::{Config, PhenomenonTimeZone};
use sensor_injector::infra::http_client::SensorThingsClient;
use sensor_injector::infra::in_memory::InMemorySensorThings;
use sensor_injector::logging;
use sensor_injector::pipeline::InjectionSettings;
use sensor_injector::registry::FormatRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sensor_injector")]
#[command(about = "Injects sensor observation files into a SensorThings API server")]
#[command(version)]
struct Cli {
    /// Input file, as a path or a file:// URL
    #[arg(short, long)]
    input: String,

    /// SensorThings API service root, e.g. http://localhost:8080/FROST-Server/v1.0
    #[arg(short, long)]
    endpoint: String,

    /// Data format of the input file
    #[arg(short = 'f', long, value_parser = PossibleValuesParser::new(FormatRegistry::handled_names()))]
    data_format: String,

    /// Configuration file (defaults to $SENSOR_INJECTOR_CONFIG or config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Zone of phenomenon times: local, UTC or an offset like +01:00
    #[arg(long)]
    time_zone: Option<PhenomenonTimeZone>,

    /// Inject into an in-memory store instead of the endpoint
    #[arg(long)]
    dry_run: bool,
}

/// Plain paths are kept as-is, `file://` URLs are converted
fn input_path(raw: &str) -> anyhow::Result<PathBuf> {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("Input URL '{}' does not denote a local file", raw)),
        Ok(url) if url.scheme().len() > 1 => bail!("Unsupported input scheme '{}' in '{}'", url.scheme(), raw),
        _ => Ok(PathBuf::from(raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(time_zone) = cli.time_zone {
        config.injector.time_zone = time_zone;
    }
    let _guard = logging::init_logging(&config.logging);

    let input = input_path(&cli.input)?;

    let service: Arc<dyn SensorThingsPort> = if cli.dry_run {
        info!("Dry run: observations are kept in memory");
        Arc::new(InMemorySensorThings::new())
    } else {
        Arc::new(SensorThingsClient::new(&cli.endpoint, &config.http)?)
    };

    let mut registry = FormatRegistry::new(InjectionSettings::from_config(&config))?;
    registry.handle(&cli.data_format, input, service)?;

    let timeout = config.injector.await_timeout();
    if !registry.await_termination(timeout).await {
        warn!("Deadline of {:?} passed, waiting for the in-flight injection", timeout);
        registry.await_completion().await;
    }
    registry.join();

    let failed: Vec<_> = registry.reports().into_iter().filter(|r| !r.succeeded()).collect();
    for report in &failed {
        error!(
            "Injection {} of {} failed: {}",
            report.run_id,
            report.input,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !failed.is_empty() {
        bail!("{} injection(s) failed", failed.len());
    }
    Ok(())
}
