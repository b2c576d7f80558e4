//! `Scheduler`: the periodic driver (component I, spec.md 4.5) that runs
//! five independent jobs on their own cadences, grounded on
//! `durable::worker::pool::WorkerPool`'s `start`/`shutdown` shape --
//! one `tokio::spawn`ed loop per job instead of one loop per activity
//! type, since the jobs here have fixed cadences rather than a shared
//! poll-and-claim loop.
//!
//! Tolerates multiple concurrent instances (spec.md 4.5): correctness
//! relies solely on the outbox's lease semantics, so nothing here
//! coordinates across processes beyond the `leaseholder_id` each
//! instance generates at startup.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use ticketflow_outbox::{NotificationRenderer, NotificationTransport, OutboxRepository};
use ticketflow_storage::{AuditRepository, TicketRepository};

use crate::config::SchedulerConfig;
use crate::dispatch::Dispatcher;
use crate::leaseholder::generate_leaseholder_id;
use crate::sla::SlaSweeper;

pub struct Scheduler {
    config: SchedulerConfig,
    leaseholder_id: String,
    dispatcher: Arc<Dispatcher>,
    sla: Arc<SlaSweeper>,
    outbox: Arc<dyn OutboxRepository>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        outbox: Arc<dyn OutboxRepository>,
        audit: Arc<dyn AuditRepository>,
        transport: Arc<dyn NotificationTransport>,
        config: SchedulerConfig,
    ) -> Self {
        let leaseholder_id = generate_leaseholder_id();
        let renderer = Arc::new(NotificationRenderer::new());
        let dispatcher = Arc::new(Dispatcher::new(outbox.clone(), renderer, transport, leaseholder_id.clone(), config.clone()));
        let sla = Arc::new(SlaSweeper::new(tickets, outbox.clone(), audit, config.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            leaseholder_id,
            dispatcher,
            sla,
            outbox,
            shutdown_tx,
            shutdown_rx,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn leaseholder_id(&self) -> &str {
        &self.leaseholder_id
    }

    /// Spawns all five jobs as independent background tasks. Returns
    /// immediately; call `shutdown` to stop them.
    #[instrument(skip(self), fields(leaseholder_id = %self.leaseholder_id))]
    pub fn start(&self) {
        info!("scheduler starting");
        let mut handles = self.handles.lock().unwrap();

        handles.push(spawn_loop(self.config.interval, self.shutdown_rx.clone(), {
            let dispatcher = self.dispatcher.clone();
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Err(err) = dispatcher.process_pending().await {
                        error!(error = %err, "process_notifications job failed");
                    }
                }
            }
        }));

        handles.push(spawn_loop(self.config.stale_cleanup_interval, self.shutdown_rx.clone(), {
            let outbox = self.outbox.clone();
            let stale_lock_cleanup = self.config.stale_lock_cleanup;
            move || {
                let outbox = outbox.clone();
                async move {
                    let now = chrono::Utc::now();
                    match outbox.cleanup_stale_leases(stale_lock_cleanup, now).await {
                        Ok(cleaned) if cleaned > 0 => info!(cleaned, "cleaned up stale outbox leases"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "cleanup_stale_leases job failed"),
                    }
                }
            }
        }));

        handles.push(spawn_loop(self.config.sla_sweep_interval, self.shutdown_rx.clone(), {
            let sla = self.sla.clone();
            move || {
                let sla = sla.clone();
                async move {
                    let now = chrono::Utc::now();
                    if let Err(err) = sla.reminder_sweep(now).await {
                        error!(error = %err, "sla_reminder_sweep job failed");
                    }
                }
            }
        }));

        handles.push(spawn_loop(self.config.sla_sweep_interval, self.shutdown_rx.clone(), {
            let sla = self.sla.clone();
            move || {
                let sla = sla.clone();
                async move {
                    let now = chrono::Utc::now();
                    if let Err(err) = sla.escalation_sweep(now).await {
                        error!(error = %err, "sla_escalation_sweep job failed");
                    }
                }
            }
        }));

        handles.push(spawn_loop(self.config.retry_interval, self.shutdown_rx.clone(), {
            let dispatcher = self.dispatcher.clone();
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Err(err) = dispatcher.process_retry_ready().await {
                        error!(error = %err, "retry_failed_notifications job failed");
                    }
                }
            }
        }));
    }

    /// Signals every job loop to stop and waits for them to exit.
    #[instrument(skip(self), fields(leaseholder_id = %self.leaseholder_id))]
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }
}

/// Runs `job` on a fixed `interval`, stopping as soon as the shutdown
/// channel fires. `tokio::time::interval` is used rather than
/// `sleep`-in-a-loop so a slow job tick doesn't drift the cadence the
/// way repeated `sleep(interval)` calls would.
fn spawn_loop<F, Fut>(interval: std::time::Duration, mut shutdown_rx: watch::Receiver<bool>, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    job().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
