use crate::cancel::CancellationToken;
use crate::error::MeasureError;
use crate::report::{format_latency, report_outcome, ReportSink};
use crate::settings::Settings;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

pub const COMPLETE: &str = "Ping test complete!";

const READ_BUF_LEN: usize = 4096;
/// How long a probe gets to exit after the terminate signal before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Extracts the round-trip time from a probe reply line such as
/// `64 bytes from 8.8.8.8: icmp_seq=1 ttl=64 time=23.4 ms`.
pub fn parse_rtt(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let mut seen_dot = false;
    let end = rest
        .find(|c: char| match c {
            '.' if !seen_dot => {
                seen_dot = true;
                false
            }
            c => !c.is_ascii_digit(),
        })
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Reassembles newline-terminated lines from arbitrary output chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `chunk` and returns every line it completed. A trailing
    /// partial line stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// The most recent `capacity` samples; the oldest is dropped first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Pid of the running probe, shared with whoever may need to stop it from
/// outside the loop. Cleared before the child is reaped, so a recycled pid
/// is never signalled.
#[derive(Debug, Clone, Default)]
pub struct ProbeSignal {
    pid: Arc<Mutex<Option<u32>>>,
}

impl ProbeSignal {
    fn slot(&self) -> MutexGuard<'_, Option<u32>> {
        self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, pid: Option<u32>) {
        *self.slot() = pid;
    }

    fn disarm(&self) {
        self.slot().take();
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    /// Asks the probe to exit. Returns false if none is running or the
    /// platform has no terminate signal.
    pub fn terminate(&self) -> bool {
        let slot = self.slot();
        match *slot {
            Some(pid) => send_terminate(pid),
            None => false,
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "sent SIGTERM to probe");
            true
        }
        Err(err) => {
            debug!(pid, %err, "failed to signal probe");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> bool {
    false
}

/// A running probe process. Killed when dropped, whatever the exit path.
pub struct PingProbe {
    program: String,
    child: Child,
    signal: ProbeSignal,
}

impl PingProbe {
    pub fn spawn(settings: &Settings) -> Result<Self, MeasureError> {
        let mut cmd = Command::new(&settings.ping_program);
        cmd.args(settings.ping_args());
        Self::from_command(&settings.ping_program, cmd)
    }

    /// Spawns an arbitrary command as the probe. Its stdout is captured and
    /// everything else is discarded.
    pub fn from_command(program: &str, mut cmd: Command) -> Result<Self, MeasureError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|source| MeasureError::Spawn {
            program: program.to_string(),
            source,
        })?;
        debug!(program, pid = ?child.id(), "probe spawned");
        let signal = ProbeSignal::default();
        signal.arm(child.id());
        Ok(Self {
            program: program.to_string(),
            child,
            signal,
        })
    }

    /// Publishes this probe's pid through `signal` instead of a private one.
    pub fn with_signal(mut self, signal: ProbeSignal) -> Self {
        self.signal.disarm();
        signal.arm(self.child.id());
        self.signal = signal;
        self
    }

    pub fn signal(&self) -> ProbeSignal {
        self.signal.clone()
    }

    fn take_stdout(&mut self) -> Result<ChildStdout, MeasureError> {
        self.child.stdout.take().ok_or_else(|| {
            MeasureError::ProbeRead(std::io::Error::other("probe stdout was not captured"))
        })
    }

    pub fn is_alive(&mut self) -> bool {
        let mut pid = self.signal.slot();
        let alive = matches!(self.child.try_wait(), Ok(None));
        if !alive {
            pid.take();
        }
        alive
    }

    /// Sends the terminate signal, kills the process if it is still around
    /// after a short grace period, and reaps it.
    pub async fn terminate(&mut self) {
        let signalled = self.signal.terminate();
        self.signal.disarm();
        if signalled {
            match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(?status, "probe terminated");
                    return;
                }
                Ok(Err(err)) => {
                    warn!(%err, "failed to reap probe");
                    return;
                }
                Err(_) => warn!(grace = ?TERMINATE_GRACE, "probe ignored SIGTERM; killing it"),
            }
        }
        if let Err(err) = self.child.start_kill() {
            debug!(%err, "probe already gone");
        }
        match self.child.wait().await {
            Ok(status) => debug!(?status, "probe killed"),
            Err(err) => warn!(%err, "failed to reap probe"),
        }
    }

    async fn wait(&mut self) -> Result<ExitStatus, MeasureError> {
        self.signal.disarm();
        self.child.wait().await.map_err(MeasureError::ProbeRead)
    }
}

impl Drop for PingProbe {
    fn drop(&mut self) {
        self.signal.disarm();
    }
}

/// Runs the system probe against `settings.ping_host` until it exits or
/// the token is cancelled.
/// The probe's pid is published through `signal` while it runs.
pub async fn run<R>(
    settings: &Settings,
    token: &CancellationToken,
    signal: &ProbeSignal,
    sink: &R,
) where
    R: ReportSink + ?Sized,
{
    info!(host = %settings.ping_host, program = %settings.ping_program, "ping test started");
    sink.report(&format!("Testing ping to {}...", settings.ping_host), "...");

    let outcome = match PingProbe::spawn(settings) {
        Ok(probe) => monitor(probe.with_signal(signal.clone()), settings, token, sink).await,
        Err(err) => Err(err),
    };
    finish(outcome, sink);
}

/// Same as [`run`] with an already spawned probe.
pub async fn run_with_probe<R>(
    probe: PingProbe,
    settings: &Settings,
    token: &CancellationToken,
    sink: &R,
) where
    R: ReportSink + ?Sized,
{
    info!(host = %settings.ping_host, program = %probe.program, "ping test started");
    sink.report(&format!("Testing ping to {}...", settings.ping_host), "...");
    let outcome = monitor(probe, settings, token, sink).await;
    finish(outcome, sink);
}

fn finish<R>(outcome: Result<(), MeasureError>, sink: &R)
where
    R: ReportSink + ?Sized,
{
    if let Err(err) = outcome {
        if !err.is_cancelled() {
            warn!(error = %err, "ping test failed");
        }
        report_outcome(sink, &err);
    }
    info!("ping test finished");
}

async fn monitor<R>(
    mut probe: PingProbe,
    settings: &Settings,
    token: &CancellationToken,
    sink: &R,
) -> Result<(), MeasureError>
where
    R: ReportSink + ?Sized,
{
    let mut stdout = probe.take_stdout()?;
    let mut lines = LineBuffer::default();
    let mut window = RollingWindow::new(settings.ping_window);
    let mut buf = vec![0u8; READ_BUF_LEN];
    let status = format!("Pinging {}...", settings.ping_host);

    let record = |line: &str, window: &mut RollingWindow| {
        if let Some(rtt) = parse_rtt(line) {
            window.push(rtt);
            sink.report(&status, &format_latency(rtt));
        }
    };

    loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            read = stdout.read(&mut buf) => Some(read.map_err(MeasureError::ProbeRead)?),
        };
        let Some(read) = read else {
            probe.terminate().await;
            return Err(MeasureError::Cancelled);
        };
        if read == 0 {
            break;
        }
        for line in lines.push(&buf[..read]) {
            record(&line, &mut window);
        }
    }
    if let Some(line) = lines.finish() {
        record(&line, &mut window);
    }

    let exit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        exit = probe.wait() => Some(exit?),
    };
    let Some(exit) = exit else {
        probe.terminate().await;
        return Err(MeasureError::Cancelled);
    };
    debug!(?exit, samples = window.len(), "probe output ended");

    let Some(average) = window.average() else {
        if exit.success() {
            return Ok(());
        }
        return Err(MeasureError::ProbeExited {
            program: probe.program.clone(),
            status: exit,
        });
    };
    if token.is_cancelled() {
        return Err(MeasureError::Cancelled);
    }
    sink.report(COMPLETE, &format_latency(average));
    Ok(())
}
