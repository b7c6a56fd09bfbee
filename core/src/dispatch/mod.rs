//! The priority-wave subscriber dispatch algorithm shared by all three
//! callback pipelines.

pub mod conntrack;
pub mod netlogger;
pub mod nfqueue;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use packetd_eventqueue::{critical_oc, RateLimiter};

use crate::registry::{into_waves, SubscriberHandle, PRIORITY_CEILING};

/// Counter key for the "%OC" rate-limited critical log on a missed
/// per-handler deadline (spec §7 error kind 4).
const TIMEOUT_COUNTER_KEY: &str = "nfqueue_handler_timeout";
const TIMEOUT_LOG_WINDOW: u64 = 20;

/// Runs `members` in ascending-priority waves, launching every member of a
/// wave concurrently (via `tokio::spawn`) and joining before advancing.
/// Aborts the process if a registered priority exceeds [`PRIORITY_CEILING`]
/// — a fatal invariant violation, not a recoverable runtime condition.
async fn for_each_wave<H, Fut, O>(
    handles: Vec<SubscriberHandle<H>>,
    invoke: impl Fn(Arc<H>) -> Fut + Send + Sync + 'static,
) -> Vec<(String, O)>
where
    H: Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let waves = into_waves(handles);
    let mut results = Vec::new();
    for (priority, members) in waves {
        if priority > PRIORITY_CEILING {
            log::log!(log::Level::Error, "subscriber priority {priority} exceeds the dispatch ceiling of {PRIORITY_CEILING}; aborting");
            std::process::abort();
        }
        let mut joins = Vec::with_capacity(members.len());
        for member in members {
            let owner = member.owner.clone();
            joins.push((owner, tokio::spawn(invoke(member.handler.clone()))));
        }
        for (owner, task) in joins {
            match task.await {
                Ok(output) => results.push((owner, output)),
                Err(join_err) => log::error!("handler '{owner}' task panicked: {join_err}"),
            }
        }
    }
    results
}

/// Like [`for_each_wave`] but enforces a per-handler deadline (the NFQueue
/// pipeline's 30 s timeout). A handler that times out contributes `None`;
/// the caller decides what that means (nfqueue: synthesize a release).
async fn for_each_wave_timeout<H, Fut, O>(
    handles: Vec<SubscriberHandle<H>>,
    timeout: Duration,
    limiter: &RateLimiter,
    invoke: impl Fn(Arc<H>) -> Fut + Send + Sync + 'static,
) -> Vec<(String, Option<O>)>
where
    H: Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let waves = into_waves(handles);
    let mut results = Vec::new();
    for (priority, members) in waves {
        if priority > PRIORITY_CEILING {
            log::log!(log::Level::Error, "subscriber priority {priority} exceeds the dispatch ceiling of {PRIORITY_CEILING}; aborting");
            std::process::abort();
        }
        let mut joins = Vec::with_capacity(members.len());
        for member in members {
            let owner = member.owner.clone();
            let fut = invoke(member.handler.clone());
            joins.push((owner, tokio::spawn(tokio::time::timeout(timeout, fut))));
        }
        for (owner, task) in joins {
            let outcome = match task.await {
                Ok(Ok(output)) => Some(output),
                Ok(Err(_elapsed)) => {
                    critical_oc!(
                        limiter,
                        TIMEOUT_COUNTER_KEY,
                        TIMEOUT_LOG_WINDOW,
                        "handler '{owner}' exceeded its {timeout:?} deadline; synthesizing release"
                    );
                    None
                }
                Err(join_err) => {
                    log::error!("handler '{owner}' task panicked: {join_err}");
                    None
                }
            };
            results.push((owner, outcome));
        }
    }
    results
}
