use crate::cancel::CancellationToken;
use crate::report::{ReportSink, PLACEHOLDER, STOPPED};
use crate::settings::Settings;
use crate::speedtest::ping::{self, ProbeSignal};
use crate::speedtest::{download, upload, MeasurementKind};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Controller {
    shared: Arc<Shared>,
}

struct Shared {
    settings: Settings,
    client: Client,
    sink: Arc<dyn ReportSink>,
    runtime: Handle,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_generation: u64,
    active: Option<ActiveRun>,
    /// A cancelled task that may still be unwinding.
    draining: Option<JoinHandle<()>>,
}

struct ActiveRun {
    generation: u64,
    kind: MeasurementKind,
    token: CancellationToken,
    probe: ProbeSignal,
    task: Option<JoinHandle<()>>,
}

impl State {
    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    /// Cancels the active run, if any, and remembers its task. A running
    /// probe is signalled here rather than left to the loop.
    fn cancel_active(&mut self) -> Option<MeasurementKind> {
        let run = self.active.take()?;
        run.token.cancel();
        if run.probe.terminate() {
            debug!(generation = run.generation, "probe signalled");
        }
        if let Some(task) = run.task {
            if let Some(older) = self.draining.replace(task) {
                // Superseded twice in a row; nobody will wait for it now.
                older.abort();
            }
        }
        Some(run.kind)
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by a run's task once its loop has returned.
    fn finish(&self, generation: u64, kind: MeasurementKind) {
        let mut state = self.state();
        if state.is_current(generation) {
            state.active = None;
            info!(%kind, generation, "measurement ended");
            self.sink.controls_enabled(true);
        }
    }

    async fn wait_for_previous(&self, mut previous: JoinHandle<()>) {
        let grace = self.settings.handoff_grace;
        if tokio::time::timeout(grace, &mut previous).await.is_err() {
            warn!(?grace, "previous measurement still running; aborting it");
            previous.abort();
            let _ = previous.await;
        }
    }
}

/// Report sink handed to a single run. Forwards only while that run is the
/// active one.
struct RunReporter {
    shared: Arc<Shared>,
    generation: u64,
}

impl ReportSink for RunReporter {
    fn report(&self, status: &str, metric: &str) {
        let state = self.shared.state();
        if state.is_current(self.generation) {
            self.shared.sink.report(status, metric);
        } else {
            debug!(generation = self.generation, status, "dropping stale update");
        }
    }
}

impl Controller {
    /// Must be called from within a Tokio runtime; runs are spawned onto it,
    /// so `start` and `stop` may then be called from any thread.
    pub fn new(settings: Settings, sink: Arc<dyn ReportSink>) -> Result<Self> {
        let runtime =
            Handle::try_current().context("the controller needs a running Tokio runtime")?;
        let client = settings
            .http_client()
            .context("failed to build HTTP client")?;
        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                client,
                sink,
                runtime,
                state: Mutex::new(State::default()),
            }),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn current(&self) -> Option<MeasurementKind> {
        self.shared.state().active.as_ref().map(|run| run.kind)
    }

    /// Starts `kind`, stopping whatever was running first. Never blocks on
    /// the old run; its late reports are dropped.
    pub fn start(&self, kind: MeasurementKind) {
        let mut state = self.shared.state();
        if let Some(previous) = state.cancel_active() {
            info!(%previous, next = %kind, "replacing running measurement");
        }
        let previous_task = state.draining.take();

        state.last_generation += 1;
        let generation = state.last_generation;
        let token = CancellationToken::new();
        let probe = ProbeSignal::default();
        state.active = Some(ActiveRun {
            generation,
            kind,
            token: token.clone(),
            probe: probe.clone(),
            task: None,
        });
        self.shared.sink.controls_enabled(false);
        info!(%kind, generation, "measurement started");

        let shared = Arc::clone(&self.shared);
        let task = self.shared.runtime.spawn(async move {
            if let Some(previous) = previous_task {
                shared.wait_for_previous(previous).await;
            }
            let reporter = RunReporter {
                shared: Arc::clone(&shared),
                generation,
            };
            match kind {
                MeasurementKind::Download => {
                    download::run(&shared.client, &shared.settings, &token, &reporter).await
                }
                MeasurementKind::Upload => {
                    upload::run(&shared.client, &shared.settings, &token, &reporter).await
                }
                MeasurementKind::Ping => {
                    ping::run(&shared.settings, &token, &probe, &reporter).await
                }
            }
            shared.finish(generation, kind);
        });
        if let Some(run) = state.active.as_mut() {
            run.task = Some(task);
        }
    }

    /// Cancels the active run, if any. Safe to call at any time.
    pub fn stop(&self) {
        let mut state = self.shared.state();
        match state.cancel_active() {
            Some(kind) => info!(%kind, "measurement stopped"),
            None => debug!("stop requested with nothing running"),
        }
        self.shared.sink.report(STOPPED, PLACEHOLDER);
        self.shared.sink.controls_enabled(true);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        state.cancel_active();
    }
}
