//! Integration tests for the virtual user pool.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rampload::config::ExecutionSettings;
use rampload::context::RunContext;
use rampload::errors::{ErrorCategory, RequestError};
use rampload::invoker::{InvocationResult, Invoker};
use rampload::plan::{Interpolation, RunPlan, Stage};
use rampload::pool::VirtualUserPool;
use rampload::think_time::ThinkTime;

/// Invoker that sleeps for `delay` and then succeeds or fails.
struct ScriptedInvoker {
    calls: AtomicU64,
    delay: Duration,
    fail: bool,
}

impl ScriptedInvoker {
    fn new(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            delay,
            fail,
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self) -> InvocationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now();
        tokio::time::sleep(self.delay).await;
        if self.fail {
            InvocationResult::failure(
                timestamp,
                self.delay,
                RequestError::new(ErrorCategory::NetworkError, "connection refused"),
            )
        } else {
            InvocationResult::success(timestamp, self.delay, 200)
        }
    }
}

fn context(invoker: Arc<dyn Invoker>, think: Duration, ramp_down: Duration) -> Arc<RunContext> {
    let plan = RunPlan::new(
        vec![Stage::new(Duration::from_secs(60), 10)],
        0,
        Interpolation::Linear,
    )
    .unwrap();
    let settings = ExecutionSettings {
        graceful_ramp_down: ramp_down,
        ..Default::default()
    };
    Arc::new(RunContext::new(plan, invoker, ThinkTime::Fixed(think), settings))
}

#[tokio::test]
async fn request_errors_do_not_stop_the_loop() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(1), true);
    let ctx = context(invoker.clone(), Duration::from_millis(10), Duration::from_secs(1));
    let mut pool = VirtualUserPool::new(ctx.clone());

    pool.set_target(1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    pool.reap();

    assert_eq!(pool.running(), 1, "failing user must keep running");
    assert!(invoker.calls() >= 5, "only {} calls made", invoker.calls());

    let summary = ctx.aggregator.summarize();
    assert_eq!(summary.failed_requests, summary.total_requests);
    assert_eq!(summary.errors_by_category.get("network_error"), Some(&summary.total_requests));

    let report = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(report.graceful, 1);
    assert_eq!(report.aborted, 0);

    println!("✅ failing requests are recorded and the user keeps iterating");
}

#[tokio::test]
async fn think_time_spaces_iterations() {
    let invoker = ScriptedInvoker::new(Duration::ZERO, false);
    let ctx = context(invoker.clone(), Duration::from_millis(100), Duration::from_secs(1));
    let mut pool = VirtualUserPool::new(ctx);

    pool.set_target(1);
    tokio::time::sleep(Duration::from_millis(350)).await;
    pool.drain(Duration::from_secs(1)).await;

    let calls = invoker.calls();
    assert!((3..=5).contains(&calls), "expected about 4 iterations, got {}", calls);

    println!("✅ think time paces a user's iterations");
}

#[tokio::test]
async fn shrink_keeps_size_within_target_plus_stragglers() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(5), false);
    let ctx = context(invoker, Duration::from_millis(50), Duration::from_secs(5));
    let mut pool = VirtualUserPool::new(ctx.clone());

    for target in [5u32, 8, 3, 6, 0, 2] {
        pool.reap();
        pool.set_target(target);
        assert_eq!(pool.running(), target as usize);
        assert!(
            pool.size() <= target as usize + pool.stragglers(),
            "size {} exceeds target {} + stragglers {}",
            pool.size(),
            target,
            pool.stragglers()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Stopped users finish their iteration and exit on their own.
    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.reap();
    assert_eq!(pool.stragglers(), 0);
    assert_eq!(pool.size(), 2);
    assert_eq!(ctx.active_users().get(), 2);

    let report = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(report.aborted, 0);
    assert_eq!(ctx.active_users().get(), 0);

    println!("✅ pool size bounded by target plus stragglers");
}

#[tokio::test]
async fn stragglers_past_ramp_down_window_are_aborted() {
    let invoker = ScriptedInvoker::new(Duration::from_secs(30), false);
    let ctx = context(invoker.clone(), Duration::ZERO, Duration::from_millis(50));
    let mut pool = VirtualUserPool::new(ctx.clone());

    pool.set_target(2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(invoker.calls(), 2);

    pool.set_target(1);
    assert_eq!(pool.stragglers(), 1);

    pool.reap();
    assert_eq!(pool.stragglers(), 1, "grace period has not elapsed yet");

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.reap();
    assert_eq!(pool.stragglers(), 0);
    assert_eq!(pool.running(), 1);

    let report = pool.drain(Duration::from_millis(50)).await;
    assert_eq!(report.aborted, 2, "ramp-down abort plus drain abort");
    assert_eq!(report.graceful, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctx.active_users().get(), 0, "aborted users release their slot");

    println!("✅ slow stragglers are hard-aborted");
}

#[tokio::test]
async fn drain_waits_for_in_flight_requests() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(150), false);
    let ctx = context(invoker, Duration::ZERO, Duration::from_secs(1));
    let mut pool = VirtualUserPool::new(ctx.clone());

    pool.set_target(3);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let report = pool.drain(Duration::from_secs(2)).await;
    assert_eq!(report.graceful, 3);
    assert_eq!(report.aborted, 0);
    assert_eq!(pool.size(), 0);

    // Each user finished the request it had in flight.
    assert!(ctx.aggregator.summarize().total_requests >= 3);

    println!("✅ drain lets in-flight requests complete");
}

#[tokio::test]
async fn cancelling_the_run_stops_every_user() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(1), false);
    let ctx = context(invoker, Duration::from_secs(10), Duration::from_secs(1));
    let mut pool = VirtualUserPool::new(ctx.clone());

    pool.set_target(4);
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.reap();
    assert_eq!(pool.running(), 0, "every user exits once the run token is cancelled");
    assert_eq!(ctx.active_users().get(), 0);

    println!("✅ run cancellation reaches every user");
}
