//! Fixed-size worker pool for the detail phase.
//!
//! Workers pop links from a shared queue, fetch and extract, and report each
//! outcome on a completion channel. Only the coordinator touches the result
//! collections. A challenge page is escalated to the coordinator, which
//! decides whether the URL is re-queued, dropped, or the whole run stops.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::interrupted;
use crate::config::ChallengePolicy;
use crate::models::{DetailRecord, ListingLink};
use crate::scraper::http_client::polite_delay;
use crate::scraper::parsers::Extracted;
use crate::scraper::sites::Site;
use crate::scraper::{PageFetcher, PageOutcome, fetch_detail};
use crate::utils::prompt_enter;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub request_delay: Duration,
    pub jitter_ms: u64,
    pub policy: ChallengePolicy,
    /// Whether an operator is present to solve challenges.
    pub interactive: bool,
}

#[derive(Debug)]
pub struct PoolReport<R> {
    /// Completion order.
    pub records: Vec<R>,
    pub failed: Vec<String>,
    pub skipped: usize,
    pub total: usize,
    pub interrupted: bool,
}

/// What a worker should do with a URL that hit a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockedReply {
    Requeue,
    Drop,
    Stop,
}

enum WorkerEvent<R> {
    Done { link: ListingLink, record: R },
    Skipped { link: ListingLink, reason: String },
    Failed { link: ListingLink, error: String },
    Blocked { worker: usize, link: ListingLink, reply: oneshot::Sender<BlockedReply> },
}

type Queue = Arc<Mutex<VecDeque<ListingLink>>>;

/// How long interrupted workers get to close their fetchers.
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Fetch, extract and report one link. `false` ends the worker.
async fn process<S, F>(
    id: usize,
    site: &S,
    fetcher: &mut F,
    link: ListingLink,
    queue: &Queue,
    events: &mpsc::UnboundedSender<WorkerEvent<S::Record>>,
    opts: &PoolOptions,
) -> bool
where
    S: Site,
    F: PageFetcher,
{
    let event = match fetch_detail(fetcher, &link.url, site.challenge_markers()).await {
        Ok(PageOutcome::Ready(html)) => match site.extract(&link, &html) {
            Ok(Extracted::Record(record)) => WorkerEvent::Done { link, record },
            Ok(Extracted::Skipped(reason)) => WorkerEvent::Skipped { link, reason },
            Err(e) => WorkerEvent::Failed { link, error: e.to_string() },
        },
        Ok(PageOutcome::Blocked) => {
            let (tx, rx) = oneshot::channel();
            if events.send(WorkerEvent::Blocked { worker: id, link: link.clone(), reply: tx }).is_err() {
                return false;
            }
            return match rx.await {
                Ok(BlockedReply::Requeue) => {
                    queue.lock().await.push_front(link);
                    true
                }
                Ok(BlockedReply::Drop) => true,
                Ok(BlockedReply::Stop) | Err(_) => false,
            };
        }
        Err(e) => WorkerEvent::Failed { link, error: e.to_string() },
    };

    if events.send(event).is_err() {
        return false;
    }
    polite_delay(opts.request_delay, opts.jitter_ms).await;
    true
}

async fn worker<S, F>(
    id: usize,
    site: Arc<S>,
    mut fetcher: F,
    queue: Queue,
    stop: Arc<AtomicBool>,
    cancel: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<WorkerEvent<S::Record>>,
    opts: PoolOptions,
) where
    S: Site,
    F: PageFetcher,
{
    debug!("worker {} started", id);
    let cancelled = interrupted(cancel);
    tokio::pin!(cancelled);
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Some(link) = queue.lock().await.pop_front() else {
            break;
        };
        let keep_going = tokio::select! {
            biased;
            _ = &mut cancelled => false,
            go = process(id, &*site, &mut fetcher, link, &queue, &events, &opts) => go,
        };
        if !keep_going {
            break;
        }
    }
    // Runs on interrupt too, so browser processes never outlive the pool.
    fetcher.close().await;
    debug!("worker {} finished", id);
}

/// Run every link through `fetchers.len()` workers.
///
/// `interrupt` resolving stops the coordinator; what was collected so far
/// is returned. In-flight work is abandoned but each worker still closes
/// its fetcher.
pub async fn run_pool<S, F, I>(
    site: Arc<S>,
    links: Vec<ListingLink>,
    fetchers: Vec<F>,
    opts: PoolOptions,
    interrupt: I,
) -> PoolReport<S::Record>
where
    S: Site,
    F: PageFetcher + 'static,
    I: Future<Output = ()>,
{
    let total = links.len();
    let queue: Queue = Arc::new(Mutex::new(links.into_iter().collect()));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    info!("[{}] Fetching {} detail pages with {} worker(s)", site.id(), total, fetchers.len());
    let handles: Vec<_> = fetchers
        .into_iter()
        .enumerate()
        .map(|(id, fetcher)| {
            tokio::spawn(worker(
                id + 1,
                Arc::clone(&site),
                fetcher,
                Arc::clone(&queue),
                Arc::clone(&stop),
                cancel_rx.clone(),
                tx.clone(),
                opts.clone(),
            ))
        })
        .collect();
    // Workers hold the only senders; the channel closes when they all exit.
    drop(tx);

    let mut report = PoolReport { records: Vec::new(), failed: Vec::new(), skipped: 0, total, interrupted: false };
    let mut requeued: HashSet<String> = HashSet::new();
    let mut done = 0usize;

    tokio::pin!(interrupt);
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut interrupt => {
                warn!("[{}] Interrupted; keeping {} collected record(s)", site.id(), report.records.len());
                report.interrupted = true;
                stop.store(true, Ordering::SeqCst);
                let _ = cancel_tx.send(true);
                break;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WorkerEvent::Done { link, record } => {
                done += 1;
                info!("[{}/{}] {}", done, total, record.label());
                debug!("  from {}", link.url);
                report.records.push(record);
            }
            WorkerEvent::Skipped { link, reason } => {
                done += 1;
                info!("[{}/{}] skipped {}: {}", done, total, link.name.as_deref().unwrap_or(&link.url), reason);
                report.skipped += 1;
            }
            WorkerEvent::Failed { link, error } => {
                done += 1;
                warn!("[{}/{}] failed {}: {}", done, total, link.url, error);
                report.failed.push(link.url);
            }
            WorkerEvent::Blocked { worker, link, reply } => {
                let decision = match opts.policy {
                    ChallengePolicy::Pause if opts.interactive && !requeued.contains(&link.url) => {
                        prompt_enter(&format!(
                            "[{}] Worker {} hit a verification challenge on {}. Solve it in that browser window.",
                            site.id(),
                            worker,
                            link.url
                        ))
                        .await;
                        requeued.insert(link.url.clone());
                        BlockedReply::Requeue
                    }
                    ChallengePolicy::Pause if opts.interactive => {
                        done += 1;
                        warn!("[{}/{}] still blocked after retry: {}", done, total, link.url);
                        report.failed.push(link.url);
                        BlockedReply::Drop
                    }
                    _ => {
                        done += 1;
                        error!("[{}] Challenge on {}; stopping dispatch", site.id(), link.url);
                        stop.store(true, Ordering::SeqCst);
                        report.failed.push(link.url);
                        BlockedReply::Stop
                    }
                };
                // A worker that already exited has nothing left to do.
                let _ = reply.send(decision);
            }
        }
    }

    if report.interrupted {
        // Ends any worker still waiting to report or for a challenge reply.
        drop(rx);
        for mut handle in handles {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!("[{}] A worker did not close in time; aborting it", site.id());
                handle.abort();
            }
        }
    } else {
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
    }

    if stop.load(Ordering::SeqCst) && !report.interrupted {
        let undispatched: Vec<String> = queue.lock().await.drain(..).map(|l| l.url).collect();
        if !undispatched.is_empty() {
            warn!("[{}] {} URL(s) were never dispatched", site.id(), undispatched.len());
        }
        report.failed.extend(undispatched);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::sites::CompassSite;
    use crate::error::FetchError;
    use crate::scraper::testing::FixtureFetcher;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const OK: &str = "<html><body><p>学生姓名 W同学</p></body></html>";
    const CHALLENGE: &str = "<html><body><div class=\"h-captcha\"></div></body></html>";

    fn url(n: u32) -> String {
        format!("https://www.compassedu.hk/newst_{n}")
    }

    fn opts(policy: ChallengePolicy) -> PoolOptions {
        PoolOptions { request_delay: Duration::ZERO, jitter_ms: 0, policy, interactive: false }
    }

    #[tokio::test]
    async fn failures_are_reported_not_fatal() {
        let fetcher = FixtureFetcher::default().with(&url(1), OK).with(&url(2), OK).with(&url(4), OK);
        let links: Vec<ListingLink> = (1..=4).map(|n| ListingLink::new(url(n))).collect();

        let report = run_pool(
            Arc::new(CompassSite),
            links,
            vec![fetcher.clone(), fetcher.clone(), fetcher],
            opts(ChallengePolicy::Abort),
            std::future::pending(),
        )
        .await;

        assert_eq!(report.total, 4);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.failed, vec![url(3)]);
        assert!(!report.interrupted);
        assert!(report.records.iter().all(|r| r.student_name.as_deref() == Some("W同学")));
    }

    #[tokio::test]
    async fn challenge_with_abort_fails_the_remainder() {
        let fetcher = FixtureFetcher::default()
            .with(&url(1), OK)
            .with(&url(2), CHALLENGE)
            .with(&url(3), OK)
            .with(&url(4), OK);
        let links: Vec<ListingLink> = (1..=4).map(|n| ListingLink::new(url(n))).collect();

        let report =
            run_pool(Arc::new(CompassSite), links, vec![fetcher], opts(ChallengePolicy::Abort), std::future::pending())
                .await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.failed, vec![url(2), url(3), url(4)]);
    }

    #[tokio::test]
    async fn pause_without_operator_behaves_like_abort() {
        let fetcher = FixtureFetcher::default().with(&url(1), CHALLENGE).with(&url(2), OK);
        let links = vec![ListingLink::new(url(1)), ListingLink::new(url(2))];

        let report =
            run_pool(Arc::new(CompassSite), links, vec![fetcher], opts(ChallengePolicy::Pause), std::future::pending())
                .await;

        assert!(report.records.is_empty());
        assert_eq!(report.failed, vec![url(1), url(2)]);
    }

    #[tokio::test]
    async fn interrupt_keeps_partial_results() {
        let fetcher = FixtureFetcher::default().with(&url(1), OK);
        let links = vec![ListingLink::new(url(1))];

        let report =
            run_pool(Arc::new(CompassSite), links, vec![fetcher], opts(ChallengePolicy::Abort), async {}).await;

        assert!(report.interrupted);
        assert!(report.failed.is_empty());
    }

    /// Never finishes a fetch; counts how often it is closed.
    #[derive(Clone, Default)]
    struct HangingFetcher {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageFetcher for HangingFetcher {
        async fn fetch(&mut self, _url: &str) -> Result<String, FetchError> {
            std::future::pending().await
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn interrupt_closes_busy_fetchers() {
        let fetcher = HangingFetcher::default();
        let links: Vec<ListingLink> = (1..=4).map(|n| ListingLink::new(url(n))).collect();

        let report = run_pool(
            Arc::new(CompassSite),
            links,
            vec![fetcher.clone(), fetcher.clone()],
            opts(ChallengePolicy::Abort),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

        assert!(report.interrupted);
        assert!(report.records.is_empty());
        assert_eq!(fetcher.closed.load(Ordering::SeqCst), 2);
    }
}
