//! The send loop.
//!
//! One iteration sends one request per target URL, in URL order, and hands
//! every exchange to the [`ExchangeHandler`] before the next request starts.
//! With `concurrency > 1` several workers pull iterations from a shared
//! budget; each owns its copy of the body source.

use crate::application::body::{BodySource, NextBody};
use crate::application::builders::{PreparedRequest, RequestTemplate};
use crate::application::eval::Valuer;
use crate::application::services::HttpRequestService;
use crate::domain::entities::{RequestDump, Response};
use crate::domain::errors::{GurlError, Result};
use crate::domain::value_objects::{ThinkTime, Url};
use anyhow::anyhow;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Iterations to run; `None` means once, or until input ends for line
    /// replay.
    pub requests: Option<u64>,
    pub concurrency: usize,
    pub think: ThinkTime,
    /// Forget pinned variable values between iterations.
    pub repin: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            requests: None,
            concurrency: 1,
            think: ThinkTime::fixed(Duration::ZERO),
            repin: false,
        }
    }
}

/// Correlation numbers for requests of one run, starting at 1.
#[derive(Debug, Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn issued(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One request as sent and the response that came back.
#[derive(Debug)]
pub struct Exchange {
    pub seq: Option<u64>,
    pub request: RequestDump,
    pub response: Response,
}

/// Consumes responses: prints them or saves them to disk.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeHandler: Send + Sync {
    async fn handle(&self, exchange: Exchange) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn merge(&mut self, other: RunSummary) {
        self.iterations += other.iterations;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations: {} succeeded, {} failed in {:.2?}",
            self.iterations, self.succeeded, self.failed, self.elapsed
        )
    }
}

pub struct RequestRunner {
    service: Arc<HttpRequestService>,
    valuer: Arc<Valuer>,
    handler: Arc<dyn ExchangeHandler>,
    options: RunOptions,
    counter: Arc<RequestCounter>,
}

impl RequestRunner {
    pub fn new(
        service: Arc<HttpRequestService>,
        valuer: Arc<Valuer>,
        handler: Arc<dyn ExchangeHandler>,
        options: RunOptions,
    ) -> Self {
        Self {
            service,
            valuer,
            handler,
            options,
            counter: Arc::new(RequestCounter::default()),
        }
    }

    pub fn counter(&self) -> &RequestCounter {
        &self.counter
    }

    /// Runs every iteration. Transport failures are fatal for a single
    /// request and counted otherwise; any other error stops the run.
    pub async fn run(&self, urls: Vec<Url>, prepared: PreparedRequest) -> anyhow::Result<RunSummary> {
        if urls.is_empty() {
            return Err(anyhow!("no URL given"));
        }

        let replay = prepared.body.is_replay();
        if let BodySource::LineChannel(lines) = &prepared.body {
            debug!(origin = ?lines.origin(), "replaying input lines");
        }
        let limit = match self.options.requests {
            Some(n) => n,
            None if replay => u64::MAX,
            None => 1,
        };
        let mut concurrency = self.options.concurrency.max(1);
        if replay && concurrency > 1 {
            warn!(concurrency, "line replay is sequential, running a single worker");
            concurrency = 1;
        }
        if limit != u64::MAX {
            concurrency = concurrency.min(usize::try_from(limit).unwrap_or(usize::MAX).max(1));
        }

        let repeated = limit > 1;
        let shared = Shared {
            service: Arc::clone(&self.service),
            valuer: Arc::clone(&self.valuer),
            handler: Arc::clone(&self.handler),
            template: Arc::new(prepared.template),
            urls: Arc::new(urls),
            counter: repeated.then(|| Arc::clone(&self.counter)),
            issued: Arc::new(AtomicU64::new(0)),
            limit,
            think: self.options.think,
            repin: self.options.repin,
        };

        debug!(limit, concurrency, replay, "starting run");
        let started = Instant::now();
        let mut summary = if concurrency == 1 {
            Worker::new(0, shared, prepared.body).run().await?
        } else {
            self.run_workers(shared, prepared.body, concurrency).await?
        };
        summary.elapsed = started.elapsed();

        if repeated {
            info!(%summary, "run finished");
        }
        Ok(summary)
    }

    async fn run_workers(
        &self,
        shared: Shared,
        body: BodySource,
        concurrency: usize,
    ) -> anyhow::Result<RunSummary> {
        let mut set = JoinSet::new();
        for id in 0..concurrency {
            let body = body
                .try_clone()
                .ok_or_else(|| anyhow!("body source cannot be shared between workers"))?;
            set.spawn(Worker::new(id, shared.clone(), body).run());
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(tally)) => summary.merge(tally),
                Ok(Err(e)) => {
                    set.abort_all();
                    return Err(e.into());
                }
                Err(e) => {
                    set.abort_all();
                    return Err(anyhow!("worker stopped: {e}"));
                }
            }
        }
        Ok(summary)
    }
}

#[derive(Clone)]
struct Shared {
    service: Arc<HttpRequestService>,
    valuer: Arc<Valuer>,
    handler: Arc<dyn ExchangeHandler>,
    template: Arc<RequestTemplate>,
    urls: Arc<Vec<Url>>,
    counter: Option<Arc<RequestCounter>>,
    issued: Arc<AtomicU64>,
    limit: u64,
    think: ThinkTime,
    repin: bool,
}

impl Shared {
    fn claim(&self) -> bool {
        self.issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }
}

struct Worker {
    id: usize,
    shared: Shared,
    body: BodySource,
}

impl Worker {
    fn new(id: usize, shared: Shared, body: BodySource) -> Self {
        Self { id, shared, body }
    }

    async fn run(mut self) -> Result<RunSummary> {
        let mut tally = RunSummary::default();
        let single = self.shared.limit == 1;

        while self.shared.claim() {
            if tally.iterations > 0 {
                if self.shared.repin {
                    self.shared.valuer.clear_cache();
                }
                if !self.shared.think.is_zero() {
                    let pause = self.shared.think.sample();
                    debug!(worker = self.id, ?pause, "think time");
                    tokio::time::sleep(pause).await;
                }
            }

            if self.body.next_body().await? == NextBody::EndOfInput {
                debug!(worker = self.id, "input exhausted");
                break;
            }

            tally.iterations += 1;
            match self.iteration().await {
                Ok(()) => tally.succeeded += 1,
                Err(e @ GurlError::Transport { .. }) if !single => {
                    warn!(worker = self.id, iteration = tally.iterations, error = %e, "iteration failed");
                    tally.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tally)
    }

    async fn iteration(&mut self) -> Result<()> {
        for url in self.shared.urls.iter() {
            let seq = self.shared.counter.as_ref().map(|c| c.next());
            let request = self
                .shared
                .template
                .materialize(url, &self.body, &self.shared.valuer, seq)
                .await?;
            let dump = request.dump();
            let response = self.shared.service.send_request(request).await?;
            debug!(worker = self.id, ?seq, status = %response.status, "response received");
            self.shared
                .handler
                .handle(Exchange {
                    seq,
                    request: dump,
                    response,
                })
                .await?;
        }
        Ok(())
    }
}
