//! Bounded fan-out of per-package resolutions.
//!
//! Each unique `(name, version)` in a batch becomes one task on a [`JoinSet`];
//! a semaphore caps how many run at once. Duplicate identifiers share the
//! result of a single task. Results are collected as tasks finish and then
//! laid back out in input order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{PackageSpec, ResolvedPackage};
use crate::resolver::waterfall::Waterfall;

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

pub struct Scheduler {
    waterfall: Arc<Waterfall>,
    max_concurrency: usize,
    deadline: Option<Duration>,
    progress: Option<ProgressBar>,
}

impl Scheduler {
    pub fn new(waterfall: Arc<Waterfall>, max_concurrency: usize) -> Self {
        Self {
            waterfall,
            max_concurrency: max_concurrency.max(1),
            deadline: None,
            progress: None,
        }
    }

    /// Abandon whatever is still running once `deadline` has elapsed.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Resolve every identifier, returning one result per input in input order.
    ///
    /// Packages still unresolved at the deadline are reported as `UNKNOWN`.
    pub async fn resolve_all(&self, specs: &[PackageSpec]) -> Vec<ResolvedPackage> {
        let waterfall = Arc::clone(&self.waterfall);
        let results = self
            .run_with(specs, move |spec| {
                let waterfall = Arc::clone(&waterfall);
                async move { waterfall.resolve(&spec).await }
            })
            .await;

        specs
            .iter()
            .zip(results)
            .map(|(spec, result)| {
                result.unwrap_or_else(|| {
                    warn!(package = %spec.name, version = %spec.version, "resolution abandoned at deadline");
                    self.waterfall.abandoned(spec)
                })
            })
            .collect()
    }

    /// Run `work` once per unique identifier under the concurrency bound.
    ///
    /// The output is aligned with `specs`; `None` marks an identifier whose
    /// task did not finish before the deadline.
    pub async fn run_with<F, Fut, T>(&self, specs: &[PackageSpec], work: F) -> Vec<Option<T>>
    where
        F: Fn(PackageSpec) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Clone + Send + 'static,
    {
        let mut unique: Vec<PackageSpec> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let slots: Vec<usize> = specs
            .iter()
            .map(|spec| {
                *index
                    .entry((spec.name.clone(), spec.version.clone()))
                    .or_insert_with(|| {
                        unique.push(spec.clone());
                        unique.len() - 1
                    })
            })
            .collect();

        debug!(
            requested = specs.len(),
            unique = unique.len(),
            max_concurrency = self.max_concurrency,
            "starting batch"
        );
        if let Some(pb) = &self.progress {
            pb.set_length(unique.len() as u64);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut done: Vec<Option<T>> = (0..unique.len()).map(|_| None).collect();

        for (i, spec) in unique.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fut = work(spec);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (i, fut.await)
            });
        }

        let deadline = self.deadline.map(|d| Instant::now() + d);
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(remaining = tasks.len(), "batch deadline reached");
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(Ok((i, value))) => {
                    done[i] = Some(value);
                    if let Some(pb) = &self.progress {
                        pb.inc(1);
                    }
                }
                Some(Err(e)) => warn!("resolution task failed: {e}"),
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        slots.into_iter().map(|i| done[i].clone()).collect()
    }
}
