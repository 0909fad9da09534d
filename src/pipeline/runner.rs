use crate::app::ports::SensorThingsPort;
use crate::error::{InjectorError, Result};
use crate::pipeline::resolver::{EntityResolver, EnvironmentDefaults};
use crate::pipeline::InjectionSettings;
use crate::registry::FormatHandler;
use crate::types::MotionRecord;
use metrics::{counter, histogram};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Created,
    EnvironmentReady,
    Parsed,
    Injected,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Created => "Created",
            RunState::EnvironmentReady => "EnvironmentReady",
            RunState::Parsed => "Parsed",
            RunState::Injected => "Injected",
            RunState::Done => "Done",
            RunState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one injection run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub format: String,
    pub input: String,
    pub endpoint: String,
    pub state: RunState,
    pub records: usize,
    pub datastreams: usize,
    pub observations: usize,
    pub rejected: usize,
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }
}

/// One injection of one file, driven through
/// `init_environment` -> `parse` -> `inject`.
pub struct InjectionRunner {
    run_id: Uuid,
    handler: FormatHandler,
    input: PathBuf,
    service: Arc<dyn SensorThingsPort>,
    settings: InjectionSettings,
    state: RunState,
    resolver: Option<EntityResolver>,
    records: Vec<MotionRecord>,
    datastreams: usize,
    observations: usize,
    rejected: usize,
}

impl InjectionRunner {
    pub fn new(
        handler: FormatHandler,
        input: impl Into<PathBuf>,
        service: Arc<dyn SensorThingsPort>,
        settings: InjectionSettings,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            handler,
            input: input.into(),
            service,
            settings,
            state: RunState::Created,
            resolver: None,
            records: Vec::new(),
            datastreams: 0,
            observations: 0,
            rejected: 0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Records decoded by `parse`, in file order
    pub fn records(&self) -> &[MotionRecord] {
        &self.records
    }

    fn expect_state(&self, expected: RunState) -> Result<()> {
        if self.state != expected {
            return Err(InjectorError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the well-known entities the run links Datastreams to
    #[instrument(skip(self), fields(run_id = %self.run_id, format = self.handler.name))]
    pub async fn init_environment(&mut self) -> Result<()> {
        self.expect_state(RunState::Created)?;
        info!("Initializing environment...");
        let defaults = EnvironmentDefaults::init_environment(self.service.as_ref()).await?;
        self.resolver = Some((self.handler.resolver)(self.service.clone(), defaults, &self.settings));
        self.state = RunState::EnvironmentReady;
        info!("Initializing environment... Done.");
        Ok(())
    }

    #[instrument(skip(self), fields(run_id = %self.run_id, format = self.handler.name))]
    pub async fn parse(&mut self) -> Result<()> {
        self.expect_state(RunState::EnvironmentReady)?;
        info!("Parsing {}...", self.input.display());
        let bytes = tokio::fs::read(&self.input).await?;
        let parser = (self.handler.parser)();
        self.records = parser.parse(&bytes)?;
        counter!("injector_records_parsed_total", "format" => self.handler.name).increment(self.records.len() as u64);
        self.state = RunState::Parsed;
        info!("Parsing {}... Done. records={}", self.input.display(), self.records.len());
        Ok(())
    }

    /// Publishes the parsed records with exactly one bulk-create call
    #[instrument(skip(self), fields(run_id = %self.run_id, format = self.handler.name))]
    pub async fn inject(&mut self) -> Result<()> {
        self.expect_state(RunState::Parsed)?;
        let resolver = self.resolver.as_ref().ok_or_else(|| InjectorError::InvalidState {
            expected: RunState::EnvironmentReady.to_string(),
            actual: self.state.to_string(),
        })?;
        info!("Injecting {} records...", self.records.len());

        let builder = (self.handler.builder)(&self.settings);
        let groups = builder.group(resolver, self.records.clone()).await?;
        let payload = builder.to_payload(resolver, &groups).await?;
        let links = self.service.create_observations(&payload).await?;

        self.datastreams = payload.len();
        self.observations = payload.observation_count();
        self.rejected = links.iter().filter(|link| link.as_str() == "error").count();
        counter!("injector_observations_sent_total", "format" => self.handler.name)
            .increment(self.observations as u64);
        self.state = RunState::Injected;
        info!(
            "Injecting {} records... Done. datastreams={} observations={} rejected={}",
            self.records.len(),
            self.datastreams,
            self.observations,
            self.rejected
        );
        Ok(())
    }

    async fn run_phases(&mut self) -> Result<()> {
        self.init_environment().await?;
        self.parse().await?;
        self.inject().await?;
        self.state = RunState::Done;
        Ok(())
    }

    /// Runs every phase, recording rather than propagating failures
    #[instrument(skip(self), fields(run_id = %self.run_id, format = self.handler.name))]
    pub async fn run(mut self) -> RunReport {
        counter!("injector_runs_total", "format" => self.handler.name).increment(1);
        let started = Instant::now();
        info!("Starting {}", self);

        let outcome = self.run_phases().await;
        let error_text = match outcome {
            Ok(()) => {
                info!("Injection of {} finished", self.input.display());
                None
            }
            Err(e) => {
                error!("Unexpected failure for {}: {}", self, e);
                counter!("injector_run_failures_total", "format" => self.handler.name).increment(1);
                self.state = RunState::Failed;
                Some(e.to_string())
            }
        };
        histogram!("injector_run_duration_seconds", "format" => self.handler.name)
            .record(started.elapsed().as_secs_f64());

        RunReport {
            run_id: self.run_id,
            format: self.handler.name.to_string(),
            input: self.input.display().to_string(),
            endpoint: self.service.endpoint().to_string(),
            state: self.state,
            records: self.records.len(),
            datastreams: self.datastreams,
            observations: self.observations,
            rejected: self.rejected,
            error: error_text,
        }
    }
}

impl fmt::Display for InjectionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Injector '{}' ({}) set with '{}' as SensorThings endpoint and '{}' as file input",
            self.handler.name,
            self.run_id,
            self.service.endpoint(),
            self.input.display()
        )
    }
}
