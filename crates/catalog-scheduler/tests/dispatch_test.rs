//! Dispatch loop tests against real time.
//!
//! Periods are kept to a few seconds so the suite stays fast while still
//! exercising the wake-up, overlap and statistics paths end to end.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use catalog_scheduler::{
    BlockingJob, IntervalSpec, JobOptions, JobState, Runnable, SchedulerConfig,
    SchedulerError, SchedulerService,
};

fn scheduler() -> SchedulerService {
    SchedulerService::new(SchedulerConfig {
        shutdown_timeout_secs: 10,
        idle_poll_ms: 100,
        ..Default::default()
    })
    .expect("valid config")
}

fn counting_job(counter: Arc<AtomicU32>) -> impl Runnable {
    move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        }
    }
}

/// Interval job `ping` every 2 seconds, observed for 5 seconds.
#[tokio::test(flavor = "multi_thread")]
async fn test_ping_every_two_seconds() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler
        .add_interval_job(
            "ping",
            IntervalSpec::seconds(2),
            counting_job(counter.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_secs(5)).await;
    scheduler.stop(true).await;

    let runs = counter.load(Ordering::SeqCst);
    assert!((2..=3).contains(&runs), "expected 2 or 3 runs, got {}", runs);

    let stats = scheduler.get_stats("ping").unwrap();
    assert_eq!(stats.total_executions, runs as u64);
    assert_eq!(stats.successful_executions, runs as u64);
    assert_eq!(stats.failed_executions, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_never_fires_early() {
    let scheduler = scheduler();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let f = fired.clone();

    scheduler
        .add_interval_job(
            "tick",
            IntervalSpec::seconds(1),
            move || {
                let f = f.clone();
                async move {
                    f.lock().unwrap().push(Utc::now());
                    Ok::<(), String>(())
                }
            },
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(3500)).await;
    scheduler.stop(true).await;

    let fired = fired.lock().unwrap();
    assert!(fired.len() >= 2, "expected at least 2 runs, got {}", fired.len());
    for pair in fired.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= chrono::Duration::milliseconds(950),
            "runs only {}ms apart",
            gap.num_milliseconds()
        );
    }
}

/// A body slower than its own interval never overlaps itself.
#[tokio::test(flavor = "multi_thread")]
async fn test_max_instances_one_skips_overlap() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicU32::new(0));

    let (r, p, s) = (running.clone(), peak.clone(), started.clone());
    scheduler
        .add_interval_job(
            "slow",
            IntervalSpec::seconds(1),
            move || {
                let (r, p, s) = (r.clone(), p.clone(), s.clone());
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(2500)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(4500)).await;
    scheduler.stop(true).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    // Firings at ~1s and ~4s; the ones in between were skipped
    let starts = started.load(Ordering::SeqCst);
    assert!((1..=2).contains(&starts), "unexpected start count {}", starts);
    assert_eq!(
        scheduler.get_stats("slow").unwrap().total_executions,
        starts as u64
    );
}

fn tracked_slow_job(running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> impl Runnable {
    move || {
        let (r, p) = (running.clone(), peak.clone());
        async move {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(2500)).await;
            r.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), String>(())
        }
    }
}

/// Replacing a job mid-run keeps the old run counted against the ceiling.
#[tokio::test(flavor = "multi_thread")]
async fn test_replaced_job_does_not_overlap_in_flight_run() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    scheduler
        .add_interval_job(
            "slow",
            IntervalSpec::seconds(1),
            tracked_slow_job(running.clone(), peak.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(1300)).await;
    assert_eq!(running.load(Ordering::SeqCst), 1);

    let info = scheduler
        .add_interval_job(
            "slow",
            IntervalSpec::seconds(1),
            tracked_slow_job(running.clone(), peak.clone()),
            JobOptions::default().replacing(),
        )
        .unwrap();
    assert_eq!(info.running_instances, 1);

    sleep(Duration::from_millis(2500)).await;
    scheduler.stop(true).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_instances_allows_bounded_overlap() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (r, p) = (running.clone(), peak.clone());
    scheduler
        .add_interval_job(
            "overlapping",
            IntervalSpec::seconds(1),
            move || {
                let (r, p) = (r.clone(), p.clone());
                async move {
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(2500)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
            JobOptions::default().with_max_instances(2),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(3500)).await;
    scheduler.stop(true).await;

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_date_job_fires_exactly_once() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler
        .add_date_job(
            "once",
            Utc::now() + chrono::Duration::milliseconds(300),
            counting_job(counter.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let info = scheduler.get_job("once").unwrap();
    assert_eq!(info.state, JobState::Exhausted);
    assert!(info.next_run_time.is_none());

    scheduler.stop(true).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// Failing and panicking bodies are counted and contained.
#[tokio::test(flavor = "multi_thread")]
async fn test_failures_are_contained() {
    let scheduler = scheduler();
    let healthy = Arc::new(AtomicU32::new(0));

    scheduler
        .add_date_job(
            "fails",
            Utc::now(),
            || async { Err::<(), _>("upstream returned 503".to_string()) },
            JobOptions::default(),
        )
        .unwrap();
    scheduler
        .add_date_job(
            "panics",
            Utc::now(),
            || async {
                if true {
                    panic!("job body exploded");
                }
                Ok::<(), String>(())
            },
            JobOptions::default(),
        )
        .unwrap();
    scheduler
        .add_interval_job(
            "healthy",
            IntervalSpec::seconds(1),
            counting_job(healthy.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(2500)).await;
    assert!(scheduler.is_running());
    scheduler.stop(true).await;

    let fails = scheduler.get_stats("fails").unwrap();
    assert_eq!(fails.total_executions, 1);
    assert_eq!(fails.failed_executions, 1);

    let panics = scheduler.get_stats("panics").unwrap();
    assert_eq!(panics.total_executions, 1);
    assert_eq!(panics.failed_executions, 1);
    assert_eq!(scheduler.get_job("panics").unwrap().running_instances, 0);

    assert!(healthy.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_body_does_not_stall_dispatch() {
    let scheduler = scheduler();
    let ticks = Arc::new(AtomicU32::new(0));

    scheduler
        .add_date_job(
            "blocking",
            Utc::now(),
            BlockingJob::new(|| {
                std::thread::sleep(Duration::from_secs(3));
                Ok(())
            }),
            JobOptions::default(),
        )
        .unwrap();
    scheduler
        .add_interval_job(
            "ticker",
            IntervalSpec::seconds(1),
            counting_job(ticks.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(2500)).await;
    assert!(ticks.load(Ordering::SeqCst) >= 2);
    scheduler.stop(true).await;

    assert_eq!(scheduler.get_stats("blocking").unwrap().successful_executions, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pause_and_resume() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler
        .add_interval_job(
            "pausable",
            IntervalSpec::seconds(1),
            counting_job(counter.clone()),
            JobOptions::default(),
        )
        .unwrap();
    scheduler.pause_job("pausable").unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let now = Utc::now();
    let info = scheduler.resume_job("pausable").unwrap();
    assert_eq!(info.state, JobState::Active);
    assert!(info.next_run_time.unwrap() >= now);

    sleep(Duration::from_millis(1500)).await;
    scheduler.stop(true).await;
    assert!(counter.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_registration_leaves_original_running() {
    let scheduler = scheduler();
    let original = Arc::new(AtomicU32::new(0));
    let impostor = Arc::new(AtomicU32::new(0));

    scheduler
        .add_interval_job(
            "job",
            IntervalSpec::seconds(1),
            counting_job(original.clone()),
            JobOptions::default(),
        )
        .unwrap();
    let result = scheduler.add_interval_job(
        "job",
        IntervalSpec::seconds(1),
        counting_job(impostor.clone()),
        JobOptions::default(),
    );
    assert!(matches!(result, Err(SchedulerError::DuplicateId(_))));

    scheduler.start().await;
    sleep(Duration::from_millis(1500)).await;
    scheduler.stop(true).await;

    assert!(original.load(Ordering::SeqCst) >= 1);
    assert_eq!(impostor.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_job_stops_firing_but_keeps_stats() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler
        .add_interval_job(
            "short-lived",
            IntervalSpec::seconds(1),
            counting_job(counter.clone()),
            JobOptions::default(),
        )
        .unwrap();

    scheduler.start().await;
    sleep(Duration::from_millis(1300)).await;
    assert!(scheduler.remove_job("short-lived"));
    let after_removal = counter.load(Ordering::SeqCst);
    sleep(Duration::from_millis(1500)).await;
    scheduler.stop(true).await;

    assert_eq!(counter.load(Ordering::SeqCst), after_removal);
    assert!(!scheduler.remove_job("short-lived"));
    assert_eq!(
        scheduler.get_stats("short-lived").unwrap().total_executions,
        after_removal as u64
    );
}
