//! Credential-testing engine - fixed worker pool over a shared job queue

use astra_common::{
    CrackError, CrackErrorRecord, CrackJob, CrackOutcome, CrackResult, Credential,
};
use metrics::counter;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::credentials::default_credentials;
use crate::plugin::{Attempt, CrackPlugin, Endpoint};
use crate::registry::PluginRegistry;

#[derive(Debug, Clone)]
pub struct CrackOptions {
    /// Jobs evaluated concurrently. Attempts within a job are sequential.
    pub threads: usize,
    /// Bound on a single unauth check or probe.
    pub timeout: Duration,
    /// Pause before every credential attempt.
    pub delay: Duration,
    /// Keep going after the first valid credential for a job.
    pub crack_all: bool,
    pub proxy: Option<String>,
}

impl Default for CrackOptions {
    fn default() -> Self {
        Self {
            threads: 10,
            timeout: Duration::from_secs(5),
            delay: Duration::ZERO,
            crack_all: false,
            proxy: None,
        }
    }
}

/// Cooperative stop flag. Workers finish the job in flight, credential list
/// included, and take no new ones.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Default)]
pub struct CrackReport {
    pub results: Vec<CrackResult>,
    pub errors: Vec<CrackErrorRecord>,
}

enum Event {
    Found(CrackResult),
    Failed(CrackErrorRecord),
}

pub struct CrackEngine {
    registry: Arc<PluginRegistry>,
    options: CrackOptions,
    stop: StopHandle,
}

impl CrackEngine {
    pub fn new(registry: Arc<PluginRegistry>, options: CrackOptions) -> Self {
        Self {
            registry,
            options,
            stop: StopHandle::default(),
        }
    }

    /// Share an existing stop flag, e.g. one that also governs other stages.
    #[must_use]
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for stopping a running [`CrackEngine::run`] from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Evaluate every job. An empty `credentials` list means each plugin's
    /// defaults are used.
    ///
    /// Never fails: per-attempt errors end up in [`CrackReport::errors`].
    #[instrument(skip_all, fields(jobs = jobs.len(), credentials = credentials.len()))]
    pub async fn run(&self, jobs: Vec<CrackJob>, credentials: &[Credential]) -> CrackReport {
        let mut queue = VecDeque::with_capacity(jobs.len());
        for job in jobs {
            match self.registry.get(&job.protocol) {
                Some(plugin) => queue.push_back((job, plugin)),
                None => warn!("No plugin for {}, skipping {}", job.protocol, job.address),
            }
        }
        if queue.is_empty() {
            return CrackReport::default();
        }

        let workers_wanted = self.options.threads.max(1).min(queue.len());
        info!("Cracking {} jobs with {} workers", queue.len(), workers_wanted);

        let queue = Arc::new(Mutex::new(queue));
        let credentials: Arc<[Credential]> = credentials.into();
        let options = Arc::new(self.options.clone());
        let (tx, mut rx) = mpsc::channel::<Event>(256);

        let mut workers = Vec::with_capacity(workers_wanted);
        for _ in 0..workers_wanted {
            let queue = queue.clone();
            let credentials = credentials.clone();
            let options = options.clone();
            let stop = self.stop.clone();
            let tx = tx.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if stop.is_stopped() {
                        break;
                    }
                    let next = queue.lock().await.pop_front();
                    let Some((job, plugin)) = next else { break };
                    run_job(plugin.as_ref(), &job, &credentials, &options, &tx).await;
                }
            }));
        }
        drop(tx);

        // single owner of the aggregate; workers only send
        let mut report = CrackReport::default();
        while let Some(event) = rx.recv().await {
            match event {
                Event::Found(result) => report.results.push(result),
                Event::Failed(record) => report.errors.push(record),
            }
        }

        for w in workers {
            if let Err(e) = w.await {
                warn!("crack worker panicked: {}", e);
            }
        }

        info!(
            found = report.results.len(),
            errors = report.errors.len(),
            "Crack stage finished"
        );
        report
    }
}

async fn run_job(
    plugin: &dyn CrackPlugin,
    job: &CrackJob,
    credentials: &[Credential],
    options: &CrackOptions,
    tx: &mpsc::Sender<Event>,
) {
    let endpoint = Endpoint {
        address: job.address,
        timeout: options.timeout,
        proxy: options.proxy.as_deref(),
    };
    let protocol = plugin.name();

    let unauth = timeout(options.timeout, plugin.check_unauth(&endpoint))
        .await
        .unwrap_or_else(|_| Some(CrackError::timeout(options.timeout).into()));
    match unauth {
        Some(CrackOutcome::Success) => {
            info!("{} {} allows unauthenticated access", protocol, job.address);
            counter!("astra_crack_attempts_total", "protocol" => protocol, "outcome" => "unauth")
                .increment(1);
            let _ = tx
                .send(Event::Found(CrackResult {
                    address: job.address,
                    protocol: protocol.to_string(),
                    username: String::new(),
                    password: String::new(),
                    unauthenticated: true,
                }))
                .await;
            return;
        }
        Some(CrackOutcome::Error(error)) => {
            debug!(
                address = %job.address,
                protocol,
                error = %error,
                "unauth check undecided"
            );
            let _ = tx
                .send(Event::Failed(CrackErrorRecord {
                    address: job.address,
                    protocol: protocol.to_string(),
                    username: None,
                    error,
                }))
                .await;
        }
        Some(CrackOutcome::Fail) | None => {}
    }

    let defaults;
    let credentials = if credentials.is_empty() {
        defaults = default_credentials(plugin);
        &defaults[..]
    } else {
        credentials
    };

    for credential in credentials {
        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        let attempt = Attempt {
            endpoint,
            credential,
        };
        let outcome = timeout(options.timeout, plugin.probe(&attempt))
            .await
            .unwrap_or_else(|_| CrackError::timeout(options.timeout).into());
        counter!("astra_crack_attempts_total", "protocol" => protocol, "outcome" => outcome.label())
            .increment(1);

        match outcome {
            CrackOutcome::Success => {
                info!(
                    "{} {} valid credential {}:{}",
                    protocol, job.address, credential.username, credential.password
                );
                let _ = tx
                    .send(Event::Found(CrackResult {
                        address: job.address,
                        protocol: protocol.to_string(),
                        username: credential.username.clone(),
                        password: credential.password.clone(),
                        unauthenticated: false,
                    }))
                    .await;
                if !options.crack_all {
                    break;
                }
            }
            CrackOutcome::Fail => {}
            CrackOutcome::Error(error) => {
                debug!(
                    address = %job.address,
                    protocol,
                    username = %credential.username,
                    error = %error,
                    "crack attempt undecided"
                );
                let _ = tx
                    .send(Event::Failed(CrackErrorRecord {
                        address: job.address,
                        protocol: protocol.to_string(),
                        username: Some(credential.username.clone()),
                        error,
                    }))
                    .await;
            }
        }
    }
}
