//! End-to-end racing scenarios, loser cancellation, and the idempotence
//! guarantees of cancel tokens and completion callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use millrace::testing::CaptureReporter;
use millrace::{race, race_pair, Effect, Either, ThreadTimer, Timer};

const SHORT: Duration = Duration::from_millis(20);
const LONG: Duration = Duration::from_millis(250);

/// A sleep that counts how often its cancel action runs.
fn countable_sleep(duration: Duration, cancels: Arc<AtomicUsize>) -> Effect<i32, String> {
    Effect::cancelable(move |cb| {
        let abandoned = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed = abandoned.clone();
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            if !observed.load(Ordering::SeqCst) {
                cb.complete(Ok(0));
            }
        });
        Effect::delay(
            move || {
                abandoned.store(true, Ordering::SeqCst);
                cancels.fetch_add(1, Ordering::SeqCst);
            },
            |fault| fault.to_string(),
        )
    })
}

#[test]
fn faster_side_wins_and_the_loser_is_canceled_once() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let timer = ThreadTimer;

    let left = timer.sleep::<String>(SHORT).map(|_| 1);
    let right = countable_sleep(LONG, cancels.clone()).map(|_| 2);

    assert_eq!(
        race(left, right).unsafe_run_sync(),
        Ok(Either::Left(1)),
        "the 20ms side must beat the 250ms side"
    );
    assert_eq!(
        cancels.load(Ordering::SeqCst),
        1,
        "the loser's cancel action runs exactly once"
    );
}

#[test]
fn winning_failure_short_circuits_and_cancels_the_loser() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let timer = ThreadTimer;

    let left = timer
        .sleep::<String>(SHORT)
        .and_then(|_| Effect::<i32, String>::raise_error("left failed first".into()));
    let right = countable_sleep(LONG, cancels.clone());

    assert_eq!(
        race(left, right).unsafe_run_sync(),
        Err("left failed first".to_string())
    );
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn race_pair_keeps_the_loser_running() {
    let timer = ThreadTimer;
    let left = timer.sleep::<String>(SHORT).map(|_| 1);
    let right = timer.sleep::<String>(Duration::from_millis(80)).map(|_| 2);

    let program = race_pair(left, right).and_then(|outcome| match outcome {
        Either::Left((a, fiber)) => fiber.join().map(move |b| (a, b)),
        Either::Right(_) => Effect::raise_error("right should not win".into()),
    });

    assert_eq!(program.unsafe_run_sync(), Ok((1, 2)));
}

#[test]
fn race_pair_fiber_cancel_stops_the_loser() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let timer = ThreadTimer;
    let left = timer.sleep::<String>(SHORT).map(|_| 1);
    let right = countable_sleep(LONG, cancels.clone());

    let program = race_pair(left, right).and_then(|outcome| match outcome {
        Either::Left((_, fiber)) => fiber.cancel(),
        Either::Right(_) => Effect::raise_error("right should not win".into()),
    });

    assert_eq!(program.unsafe_run_sync(), Ok(()));
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn losing_failure_is_reported_not_dropped() {
    let reporter = CaptureReporter::install();
    let timer = ThreadTimer;

    let left = timer.sleep::<String>(SHORT).map(|_| 1);
    // a plain async loser has no cancel hook, so it still completes late,
    // and its failure must reach the sink
    let right: Effect<i32, String> = Effect::async_(|cb| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            cb.complete(Err("unique-late-loser-failure".into()));
        });
    });

    assert_eq!(race(left, right).unsafe_run_sync(), Ok(Either::Left(1)));
    std::thread::sleep(Duration::from_millis(120));
    assert!(
        reporter.contains("unique-late-loser-failure"),
        "a losing branch's error must be reported"
    );
}

#[test]
fn duplicate_callback_delivers_once_and_reports_the_dropped_error() {
    let reporter = CaptureReporter::install();
    let effect: Effect<i32, String> = Effect::async_(|cb| {
        cb.complete(Ok(1));
        cb.complete(Err("unique-duplicate-callback-error".into()));
    });
    assert_eq!(effect.unsafe_run_sync(), Ok(1));
    assert!(reporter.contains("unique-duplicate-callback-error"));
}

#[test]
fn fiber_cancel_token_is_idempotent() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let target = countable_sleep(LONG, cancels.clone());

    let program = target.start().and_then(|fiber| {
        let once_more = fiber.cancel();
        fiber.cancel().and_then(move |_| once_more)
    });
    assert_eq!(program.unsafe_run_sync(), Ok(()));
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn race_against_a_sleep_bounds_total_runtime() {
    // the documented recipe for a total timeout: race the work against a
    // timer
    let timer = ThreadTimer;
    let work = Effect::<i32, String>::never();
    let deadline = timer.sleep::<String>(SHORT).map(|_| -1);

    assert_eq!(
        race(work, deadline).unsafe_run_sync(),
        Ok(Either::Right(-1))
    );
}
