//! Bounded concurrency for fleet-wide operations.
//!
//! Operations are plain futures: nothing runs until the pool polls it, and the
//! pool only polls an operation once it holds a permit. All operations share
//! one cooperative scheduler, so "parallel" means many pending remote calls
//! with at most `max_concurrent` of them admitted at once.

mod semaphore;

pub use semaphore::{Permit, Semaphore};

use std::future::Future;

use futures::future::join_all;

use crate::error::{Error, Result};
use crate::executor::Host;
use crate::output::HostOutcome;

pub const DEFAULT_MAX_CONCURRENCY: usize = 30;

/// Every value and every error from an error-collecting run.
#[derive(Debug)]
pub struct CollectedResults<T> {
    pub results: Vec<T>,
    pub errors: Vec<Error>,
}

pub struct ConcurrencyPool {
    max_concurrent: usize,
    semaphore: Semaphore,
}

impl Default for ConcurrencyPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl ConcurrencyPool {
    /// A bound of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Semaphore::new(max_concurrent),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn admit<F: Future>(&self, op: F) -> F::Output {
        let _permit = self.semaphore.acquire().await;
        op.await
    }

    /// Run every operation, at most `max_concurrent` at a time, and return
    /// each outcome in submission order. Never short-circuits.
    pub async fn execute_settled<I, F, T>(&self, ops: I) -> Vec<Result<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        join_all(ops.into_iter().map(|op| self.admit(op))).await
    }

    /// Run every operation and fail if any failed. The first error in
    /// submission order is returned, but only after all siblings settle;
    /// in-flight operations are never cancelled.
    pub async fn execute_concurrent<I, F, T>(&self, ops: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        self.execute_settled(ops).await.into_iter().collect()
    }

    /// Run operations in sequential chunks of `batch_size` (default: the
    /// pool bound). A chunk fully settles before the next one starts; a chunk
    /// containing a failure stops the run.
    pub async fn execute_batched<I, F, T>(&self, ops: I, batch_size: Option<usize>) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        let batch_size = batch_size.unwrap_or(self.max_concurrent).max(1);
        let mut ops = ops.into_iter().peekable();
        let mut values = Vec::new();

        while ops.peek().is_some() {
            let batch: Vec<F> = ops.by_ref().take(batch_size).collect();
            values.extend(self.execute_concurrent(batch).await?);
        }

        Ok(values)
    }

    /// Run every operation and keep every value and every error. Used
    /// wherever one failure must not abort the others.
    pub async fn execute_with_error_collection<I, F, T>(&self, ops: I) -> CollectedResults<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        let mut collected = CollectedResults {
            results: Vec::new(),
            errors: Vec::new(),
        };

        for outcome in self.execute_settled(ops).await {
            match outcome {
                Ok(value) => collected.results.push(value),
                Err(err) => collected.errors.push(err),
            }
        }

        collected
    }

    /// Issue the same operation against every host, collecting a tagged
    /// outcome per host in host order.
    pub async fn fan_out<'h, T, Op, F>(&self, hosts: &'h [Host], op: Op) -> Vec<HostOutcome<T>>
    where
        Op: Fn(&'h Host) -> F,
        F: Future<Output = Result<T>>,
    {
        let settled = self.execute_settled(hosts.iter().map(op)).await;

        hosts
            .iter()
            .zip(settled)
            .map(|(host, result)| HostOutcome::from_result(host.name(), result))
            .collect()
    }
}
