//! Signal handling and ordered shutdown of the workers.
//!
//! Every worker is represented by a `WorkerHandle`: a way to ask it to stop
//! and a `oneshot` it completes once it has actually stopped. On the first
//! termination signal the coordinator stops the producers (weather poller
//! and dimmer) before the display, then waits for every acknowledgement,
//! bounded by the grace period.
//!
//! ## Rust concepts
//! - `Box<dyn FnOnce() + Send>` to store "how to stop" for any worker
//! - `tokio::sync::oneshot` as a one-time "I'm done" acknowledgement
//! - `tokio::time::sleep_until` for a single shared deadline

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{Instrument, Span};

// ── Worker handles ───────────────────────────────────────────────────

/// Stop request plus completion acknowledgement for one worker.
pub struct WorkerHandle {
    name: &'static str,
    stop: Option<Box<dyn FnOnce() + Send>>,
    done: oneshot::Receiver<()>,
}

impl WorkerHandle {
    pub fn new(
        name: &'static str,
        stop: impl FnOnce() + Send + 'static,
        done: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            name,
            stop: Some(Box::new(stop)),
            done,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop. Only the first call has any effect.
    pub fn request_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            tracing::debug!(worker = self.name, "Stop requested");
            stop();
        }
    }
}

/// Spawn `run` as a tokio task inside `span`.
///
/// `run` receives the stop signal; when its future completes the handle's
/// acknowledgement fires.
pub fn spawn_task<F, Fut>(name: &'static str, span: Span, run: F) -> WorkerHandle
where
    F: FnOnce(oneshot::Receiver<()>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let task = run(stop_rx);

    tokio::spawn(
        async move {
            task.await;
            let _ = done_tx.send(());
        }
        .instrument(span),
    );

    WorkerHandle::new(
        name,
        move || {
            let _ = stop_tx.send(());
        },
        done_rx,
    )
}

// ── Signals ──────────────────────────────────────────────────────────

/// Forward SIGINT, SIGTERM and SIGHUP into a channel.
///
/// The handler runs on ctrlc's own thread and never blocks: the channel is
/// unbounded and a send to a closed receiver is simply dropped.
pub fn install_signal_handler() -> Result<mpsc::UnboundedReceiver<()>, ctrlc::Error> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    Ok(rx)
}

// ── Coordinator ──────────────────────────────────────────────────────

/// Which workers acknowledged the stop in time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<&'static str>,
    pub timed_out: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

pub struct ShutdownCoordinator {
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Wait for the first signal, then shut everything down in order.
    ///
    /// A closed signal channel counts as a signal. Signals that arrive
    /// while shutting down are logged and ignored. Everything is logged
    /// inside a `shutdown` span.
    pub async fn run(
        &self,
        mut signals: mpsc::UnboundedReceiver<()>,
        producers: Vec<WorkerHandle>,
        display: WorkerHandle,
    ) -> ShutdownReport {
        async move {
            if signals.recv().await.is_none() {
                tracing::warn!("Signal channel closed, shutting down");
            } else {
                tracing::info!("Termination signal received, shutting down");
            }

            self.shutdown(&mut signals, producers, display).await
        }
        .instrument(tracing::info_span!("shutdown"))
        .await
    }

    /// Stop `producers` first, then `display`, and wait up to the grace
    /// period for all of them to acknowledge.
    pub async fn shutdown(
        &self,
        signals: &mut mpsc::UnboundedReceiver<()>,
        producers: Vec<WorkerHandle>,
        display: WorkerHandle,
    ) -> ShutdownReport {
        let deadline = Instant::now() + self.grace;

        let mut workers = producers;
        workers.push(display);
        for worker in &mut workers {
            worker.request_stop();
        }

        let mut report = ShutdownReport::default();
        let mut signals_open = true;

        for worker in workers {
            let WorkerHandle { name, mut done, .. } = worker;
            let stopped = loop {
                tokio::select! {
                    result = &mut done => {
                        if result.is_err() {
                            tracing::warn!(worker = name, "Worker exited without acknowledging");
                        }
                        break true;
                    }
                    _ = tokio::time::sleep_until(deadline) => break false,
                    signal = signals.recv(), if signals_open => {
                        match signal {
                            Some(()) => tracing::info!("Already shutting down, ignoring signal"),
                            None => signals_open = false,
                        }
                    }
                }
            };

            if stopped {
                tracing::info!(worker = name, "Worker stopped");
                report.stopped.push(name);
            } else {
                tracing::warn!(worker = name, "Worker did not stop within the grace period");
                report.timed_out.push(name);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    /// A worker that records when it is asked to stop and acknowledges
    /// immediately, or never if `hangs`.
    fn fake_worker(name: &'static str, log: &Log, hangs: bool) -> WorkerHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let log = log.clone();
        WorkerHandle::new(
            name,
            move || {
                log.lock().unwrap().push(name);
                // A dropped sender would resolve `done`; a hanging worker leaks it.
                if hangs {
                    std::mem::forget(done_tx);
                } else {
                    done_tx.send(()).unwrap();
                }
            },
            done_rx,
        )
    }

    #[tokio::test]
    async fn producers_stop_before_display() {
        let log = Log::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let report = ShutdownCoordinator::new(Duration::from_millis(500))
            .run(
                rx,
                vec![fake_worker("weather", &log, false), fake_worker("dimmer", &log, false)],
                fake_worker("display", &log, false),
            )
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["weather", "dimmer", "display"]);
        assert_eq!(report.stopped, vec!["weather", "dimmer", "display"]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn hung_worker_is_bounded_by_grace_period() {
        let log = Log::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let start = std::time::Instant::now();
        let report = ShutdownCoordinator::new(Duration::from_millis(100))
            .run(
                rx,
                vec![fake_worker("weather", &log, true)],
                fake_worker("display", &log, false),
            )
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
        assert_eq!(report.timed_out, vec!["weather"]);
        assert_eq!(report.stopped, vec!["display"]);
    }

    #[tokio::test]
    async fn repeated_signals_are_ignored() {
        let log = Log::default();
        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            tx.send(()).unwrap();
        }

        let report = ShutdownCoordinator::new(Duration::from_millis(50))
            .run(rx, vec![], fake_worker("display", &log, false))
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["display"]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn closed_signal_channel_triggers_shutdown() {
        let log = Log::default();
        let (tx, rx) = mpsc::unbounded_channel::<()>();
        drop(tx);

        let report = ShutdownCoordinator::new(Duration::from_millis(50))
            .run(rx, vec![], fake_worker("display", &log, false))
            .await;

        assert_eq!(report.stopped, vec!["display"]);
    }

    #[tokio::test]
    async fn coordinator_logs_inside_shutdown_span() {
        #[derive(Clone, Default)]
        struct Buf(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Buf {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = Buf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_target(false)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let log = Log::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        ShutdownCoordinator::new(Duration::from_millis(50))
            .run(rx, vec![], fake_worker("display", &log, false))
            .await;

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let stopped = output
            .lines()
            .find(|line| line.contains("Worker stopped"))
            .unwrap();
        assert!(stopped.contains("shutdown: "), "got {stopped:?}");
    }

    #[tokio::test]
    async fn spawn_task_acknowledges_after_stop() {
        let mut handle = spawn_task("idle", Span::none(), |stop| async move {
            let _ = stop.await;
        });
        assert_eq!(handle.name(), "idle");

        handle.request_stop();
        handle.request_stop();
        tokio::time::timeout(Duration::from_secs(1), handle.done)
            .await
            .unwrap()
            .unwrap();
    }
}
