//! Bounded-concurrency batch runner
//!
//! Items are split into consecutive chunks of `concurrency`. Chunks run
//! one after another; every member of a chunk runs on its own task and the
//! chunk settles only when all members have. Ports come from the global
//! index so they never overlap within a run.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default number of concurrent verifications
const DEFAULT_CONCURRENCY: usize = 10;

/// Default first local port
const DEFAULT_BASE_PORT: u16 = 20000;

/// Batch runner configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum in-flight tasks (values below 1 are treated as 1)
    pub concurrency: usize,
    /// Port of the item at global index 0
    pub base_port: u16,
    /// Whole-task budget; exceeding it fails only that task
    pub task_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            base_port: DEFAULT_BASE_PORT,
            task_timeout: None,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Position and port handed to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub index: usize,
    pub port: u16,
}

/// Why a task produced no output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailureKind {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task exceeded its {0:?} budget")]
    TimedOut(Duration),

    #[error("no local port available for index {0}")]
    PortUnavailable(usize),
}

/// A task that failed at the runner level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct TaskFailure {
    pub index: usize,
    pub port: Option<u16>,
    pub kind: TaskFailureKind,
}

/// Runs tasks in sequential chunks of concurrent members
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Port for a global index, `None` past the end of the port range
    pub fn port_for(&self, index: usize) -> Option<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.config.base_port.checked_add(offset))
    }

    /// Run `task` for every item and return one outcome per item, in order.
    pub async fn run<T, O, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Result<O, TaskFailure>>
    where
        T: Send + 'static,
        O: Send + 'static,
        F: Fn(T, Assignment) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
    {
        let concurrency = self.config.concurrency.max(1);
        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut items = items.into_iter().enumerate().peekable();
        let mut chunk_no = 0;

        while items.peek().is_some() {
            chunk_no += 1;
            let chunk: Vec<(usize, T)> = items.by_ref().take(concurrency).collect();
            debug!(
                "Starting chunk {} ({} of {} items)",
                chunk_no,
                chunk.len(),
                total
            );

            let settled = join_all(chunk.into_iter().map(|(index, item)| {
                let port = self.port_for(index);
                let handle = port.map(|port| {
                    let fut = task(item, Assignment { index, port });
                    let budget = self.config.task_timeout;
                    tokio::spawn(async move {
                        match budget {
                            Some(budget) => tokio::time::timeout(budget, fut).await.map_err(|_| budget),
                            None => Ok(fut.await),
                        }
                    })
                });
                async move { (index, port, settle(index, port, handle).await) }
            }))
            .await;

            for (index, port, outcome) in settled {
                if let Err(failure) = &outcome {
                    warn!("Task {} (port {:?}) failed: {}", index, port, failure);
                }
                outcomes.push(outcome);
            }
        }

        info!("Batch finished: {} items in {} chunks", total, chunk_no);
        outcomes
    }
}

async fn settle<O>(
    index: usize,
    port: Option<u16>,
    handle: Option<tokio::task::JoinHandle<Result<O, Duration>>>,
) -> Result<O, TaskFailure> {
    let failure = |kind| TaskFailure { index, port, kind };

    let Some(handle) = handle else {
        return Err(failure(TaskFailureKind::PortUnavailable(index)));
    };

    match handle.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(budget)) => Err(failure(TaskFailureKind::TimedOut(budget))),
        Err(e) => Err(failure(TaskFailureKind::Panicked(panic_message(e)))),
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
