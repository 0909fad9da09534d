//! Static table of supported data formats and the queue that runs their
//! injections one after the other.

use crate::app::ports::SensorThingsPort;
use crate::constants::{FLAT_MOTION_FORMAT, INSITEO_FORMAT};
use crate::error::{InjectorError, Result};
use crate::parser::{MotionRecordParser, RecordParser};
use crate::pipeline::{
    BatchBuilder, EntityResolver, EnvironmentDefaults, FormatCapabilities, InjectionRunner, InjectionSettings,
    RunReport,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Factories producing the three collaborators of a format's injection
#[derive(Clone, Copy)]
pub struct FormatHandler {
    pub name: &'static str,
    pub parser: fn() -> Box<dyn RecordParser>,
    pub resolver: fn(Arc<dyn SensorThingsPort>, EnvironmentDefaults, &InjectionSettings) -> EntityResolver,
    pub builder: fn(&InjectionSettings) -> BatchBuilder,
}

impl std::fmt::Debug for FormatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatHandler").field("name", &self.name).finish()
    }
}

const FLAT_MOTION_CAPABILITIES: FormatCapabilities = FormatCapabilities {
    feature_of_interest: true,
    unit_of_measurement: true,
};

const INSITEO_CAPABILITIES: FormatCapabilities = FormatCapabilities {
    feature_of_interest: false,
    unit_of_measurement: false,
};

static FORMATS: [FormatHandler; 2] = [
    FormatHandler {
        name: FLAT_MOTION_FORMAT,
        parser: flat_motion_parser,
        resolver: flat_motion_resolver,
        builder: flat_motion_builder,
    },
    FormatHandler {
        name: INSITEO_FORMAT,
        parser: insiteo_parser,
        resolver: insiteo_resolver,
        builder: insiteo_builder,
    },
];

fn flat_motion_parser() -> Box<dyn RecordParser> {
    Box::new(MotionRecordParser::new(FLAT_MOTION_FORMAT))
}

fn flat_motion_resolver(
    service: Arc<dyn SensorThingsPort>,
    defaults: EnvironmentDefaults,
    settings: &InjectionSettings,
) -> EntityResolver {
    EntityResolver::new(service, defaults, settings.sensor.clone(), FLAT_MOTION_CAPABILITIES)
}

fn flat_motion_builder(settings: &InjectionSettings) -> BatchBuilder {
    BatchBuilder::new(FLAT_MOTION_CAPABILITIES, settings.time_zone)
}

fn insiteo_parser() -> Box<dyn RecordParser> {
    Box::new(MotionRecordParser::new(INSITEO_FORMAT))
}

fn insiteo_resolver(
    service: Arc<dyn SensorThingsPort>,
    defaults: EnvironmentDefaults,
    settings: &InjectionSettings,
) -> EntityResolver {
    EntityResolver::new(service, defaults, settings.sensor.clone(), INSITEO_CAPABILITIES)
}

fn insiteo_builder(settings: &InjectionSettings) -> BatchBuilder {
    BatchBuilder::new(INSITEO_CAPABILITIES, settings.time_zone)
}

/// Dispatches injection requests by format name onto a single FIFO worker.
///
/// The worker lives on its own thread with its own runtime, so a run keeps
/// going even when the caller's runtime is shut down.
pub struct FormatRegistry {
    settings: InjectionSettings,
    sender: Option<mpsc::UnboundedSender<InjectionRunner>>,
    drained: Option<oneshot::Receiver<()>>,
    worker: Option<thread::JoinHandle<()>>,
    reports: Arc<Mutex<Vec<RunReport>>>,
}

impl FormatRegistry {
    pub fn new(settings: InjectionSettings) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (drained_tx, drained_rx) = oneshot::channel();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let worker_reports = reports.clone();
        let worker = thread::Builder::new().name("injection-worker".to_string()).spawn(move || {
            runtime.block_on(drain_queue(receiver, worker_reports));
            let _ = drained_tx.send(());
        })?;
        Ok(Self {
            settings,
            sender: Some(sender),
            drained: Some(drained_rx),
            worker: Some(worker),
            reports,
        })
    }

    pub fn lookup(name: &str) -> Option<FormatHandler> {
        FORMATS.iter().find(|handler| handler.name == name).copied()
    }

    pub fn can_handle(name: &str) -> bool {
        Self::lookup(name).is_some()
    }

    /// Names of every supported format, sorted
    pub fn handled_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = FORMATS.iter().map(|handler| handler.name).collect();
        names.sort_unstable();
        names
    }

    /// Queues the injection of `file` in format `name` against `service`
    pub fn handle(&self, name: &str, file: impl Into<PathBuf>, service: Arc<dyn SensorThingsPort>) -> Result<Uuid> {
        let handler = Self::lookup(name).ok_or_else(|| InjectorError::UnsupportedFormat {
            name: name.to_string(),
            available: Self::handled_names().into_iter().map(str::to_string).collect(),
        })?;
        let sender = self.sender.as_ref().ok_or(InjectorError::QueueClosed)?;
        let runner = InjectionRunner::new(handler, file, service, self.settings.clone());
        let run_id = runner.run_id();
        info!("Queuing {}", runner);
        sender.send(runner).map_err(|_| InjectorError::QueueClosed)?;
        Ok(run_id)
    }

    /// Stops accepting new requests, then waits up to `timeout` for the
    /// queued ones. Returns whether the queue drained in time.
    ///
    /// A run still in flight at the deadline keeps going on the worker.
    pub async fn await_termination(&mut self, timeout: Duration) -> bool {
        self.sender.take();
        let Some(drained) = self.drained.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, drained).await {
            Ok(signal) => {
                if signal.is_err() {
                    error!("Injection worker stopped abnormally");
                }
                self.drained = None;
                true
            }
            Err(_) => {
                warn!("Injection queue still busy after {:?}", timeout);
                false
            }
        }
    }

    /// Same as `await_termination` without a deadline
    pub async fn await_completion(&mut self) {
        self.sender.take();
        if let Some(drained) = self.drained.take() {
            if drained.await.is_err() {
                error!("Injection worker stopped abnormally");
            }
        }
    }

    /// Closes the queue and blocks the current thread until the worker exits
    pub fn join(&mut self) {
        self.sender.take();
        self.drained.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Injection worker panicked");
            }
        }
    }

    /// Reports of the runs finished so far, in execution order
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

async fn drain_queue(mut receiver: mpsc::UnboundedReceiver<InjectionRunner>, reports: Arc<Mutex<Vec<RunReport>>>) {
    while let Some(runner) = receiver.recv().await {
        let run_id = runner.run_id();
        // Own task per run so that a panic only takes that run down
        match tokio::spawn(runner.run()).await {
            Ok(report) => reports.lock().unwrap_or_else(PoisonError::into_inner).push(report),
            Err(e) => error!("Injection run {} aborted: {}", run_id, e),
        }
    }
    debug!("Injection queue drained");
}
