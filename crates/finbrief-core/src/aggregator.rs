//! Best-effort fan-out over fetchers.
//!
//! Every `(fetcher, input)` pair runs as its own task. A pair that errors,
//! times out or panics is logged and excluded; the rest still contribute.
//! Records come back ordered by fetcher index, then input index, whatever
//! order the tasks finished in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinSet;

use crate::fetch::{FetchError, FetchInput, SharedFetcher};
use crate::text::prepare_news;
use crate::NewsItem;

/// Aggregation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    /// Upper bound for one pair, retries included.
    pub pair_timeout: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            pair_timeout: Duration::from_secs(45),
        }
    }
}

/// One excluded `(fetcher, input)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub source: String,
    pub input: String,
    pub error: FetchError,
}

/// Outcome of one aggregation round.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<R> {
    pub records: Vec<R>,
    pub attempted: usize,
    pub failures: Vec<FetchFailure>,
    pub elapsed_ms: u64,
}

impl<R> Collection<R> {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn map_records<T>(self, f: impl FnMut(R) -> T) -> Collection<T> {
        Collection {
            records: self.records.into_iter().map(f).collect(),
            attempted: self.attempted,
            failures: self.failures,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Fetch every input from every fetcher concurrently.
pub async fn collect_all<I, R>(
    fetchers: &[SharedFetcher<I, R>],
    inputs: &[I],
    options: &CollectOptions,
) -> Collection<R>
where
    I: FetchInput,
    R: Send + 'static,
{
    let started = Instant::now();
    let mut pairs = Vec::with_capacity(fetchers.len() * inputs.len());
    let mut tasks = JoinSet::new();

    for fetcher in fetchers {
        for input in inputs {
            let slot = pairs.len();
            pairs.push((fetcher.source().to_owned(), input.clone()));

            let fetcher = Arc::clone(fetcher);
            let input = input.clone();
            let pair_timeout = options.pair_timeout;
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(pair_timeout, fetcher.fetch(input.clone())).await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::timeout(format!(
                        "no result within {} ms",
                        pair_timeout.as_millis()
                    ))
                    .with_context(fetcher.source(), &input)),
                };
                (slot, outcome)
            });
        }
    }

    let mut outcomes: Vec<Option<Result<Vec<R>, FetchError>>> =
        std::iter::repeat_with(|| None).take(pairs.len()).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
            Err(error) => tracing::error!(%error, "fetch task did not complete"),
        }
    }

    let mut records = Vec::new();
    let mut failures = Vec::new();
    for ((source, input), outcome) in pairs.into_iter().zip(outcomes) {
        let outcome = outcome.unwrap_or_else(|| {
            Err(FetchError::internal("fetch task panicked").with_context(&source, &input))
        });

        match outcome {
            Ok(batch) => records.extend(batch),
            Err(error) => {
                tracing::warn!(
                    source = %source,
                    input = %input.describe(),
                    code = error.code(),
                    error = %error.message(),
                    "fetch failed; excluding from collection"
                );
                failures.push(FetchFailure {
                    source,
                    input: input.describe(),
                    error,
                });
            }
        }
    }

    let collection = Collection {
        records,
        attempted: fetchers.len() * inputs.len(),
        failures,
        elapsed_ms: elapsed_ms(started),
    };
    tracing::debug!(
        attempted = collection.attempted,
        succeeded = collection.succeeded(),
        elapsed_ms = collection.elapsed_ms,
        "collection round finished"
    );
    collection
}

/// Collect from news outlets and run the text pass on every item.
pub async fn collect_news(
    fetchers: &[SharedFetcher<(), NewsItem>],
    options: &CollectOptions,
) -> Collection<NewsItem> {
    collect_all(fetchers, &[()], options)
        .await
        .map_records(prepare_news)
}

fn elapsed_ms(started: Instant) -> u64 {
    let elapsed = started.elapsed().as_millis();
    if elapsed > u128::from(u64::MAX) {
        u64::MAX
    } else {
        elapsed as u64
    }
}
