//! Interval scheduler for the background jobs.
//!
//! Each job gets its own `tokio` interval. A tick runs on the blocking pool
//! because jobs talk to the ledger synchronously. Nothing is held between
//! ticks, and a failed tick is logged without stopping the loop.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ports::job_port::PeriodicJob;

/// Cooperative stop flag shared by every job loop.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel on Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping scheduler");
                token.cancel();
            }
        });
    }
}

pub struct Scheduler {
    jobs: Vec<(Arc<dyn PeriodicJob>, Duration)>,
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(token: CancellationToken) -> Self {
        Scheduler {
            jobs: Vec::new(),
            token,
        }
    }

    pub fn with_job(mut self, job: Arc<dyn PeriodicJob>, period: Duration) -> Self {
        self.jobs.push((job, period));
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run every job until the token is cancelled.
    pub async fn run(self) {
        let handles: Vec<(String, JoinHandle<()>)> = self
            .jobs
            .into_iter()
            .map(|(job, period)| {
                let name = job.name().to_string();
                info!("scheduling {} every {:?}", name, period);
                let handle = tokio::spawn(run_job(job, period, self.token.clone()));
                (name, handle)
            })
            .collect();

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!("{} loop aborted: {}", name, e);
            }
        }
    }
}

async fn run_job(job: Arc<dyn PeriodicJob>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let worker = job.clone();
        match tokio::task::spawn_blocking(move || worker.run_once()).await {
            Ok(Ok(summary)) => info!("{}: {}", job.name(), summary),
            Ok(Err(e)) => warn!("{} tick failed: {}", job.name(), e),
            Err(e) => error!("{} tick panicked: {}", job.name(), e),
        }
    }

    debug!("{} stopped", job.name());
}
