//! End-to-end bracket scenarios: exit cases on success, failure, and
//! cancellation, and the release-failure reporting contract.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use millrace::testing::CaptureReporter;
use millrace::{Effect, ExitCase};

type ExitLog = Arc<Mutex<Vec<ExitCase<String>>>>;

fn exit_log() -> ExitLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn logging_release(
    log: ExitLog,
) -> impl FnOnce(&'static str, ExitCase<String>) -> Effect<(), String> + Send + 'static {
    move |_resource, exit| {
        log.lock().unwrap().push(exit);
        Effect::unit()
    }
}

#[test]
fn completed_use_logs_completed_and_yields_the_value() {
    let log = exit_log();
    let effect = Effect::<_, String>::pure("resource")
        .bracket_case(|_| Effect::pure(42), logging_release(log.clone()));

    assert_eq!(effect.unsafe_run_sync(), Ok(42));
    assert_eq!(*log.lock().unwrap(), vec![ExitCase::Completed]);
}

#[test]
fn failing_use_logs_the_error_and_reraises_it() {
    let log = exit_log();
    let effect = Effect::<_, String>::pure("resource").bracket_case(
        |_| Effect::<i32, String>::raise_error("use blew up".into()),
        logging_release(log.clone()),
    );

    assert_eq!(effect.unsafe_run_sync(), Err("use blew up".to_string()));
    assert_eq!(
        *log.lock().unwrap(),
        vec![ExitCase::Error("use blew up".to_string())]
    );
}

#[test]
fn canceling_a_fiber_logs_canceled_and_join_never_completes() {
    let log = exit_log();
    let release = logging_release(log.clone());

    let bracketed = Effect::<_, String>::pure("resource")
        .bracket_case(|_| Effect::<i32, String>::never(), release);

    let fibers = Arc::new(Mutex::new(Vec::new()));
    let fibers2 = fibers.clone();
    let program = bracketed.start().and_then(move |fiber| {
        fibers2.lock().unwrap().push(fiber.clone());
        fiber.cancel()
    });
    assert_eq!(program.unsafe_run_sync(), Ok(()));
    assert_eq!(*log.lock().unwrap(), vec![ExitCase::Canceled]);

    let fiber = fibers.lock().unwrap().pop().unwrap();
    assert_eq!(
        fiber.join().unsafe_run_timed(Duration::from_millis(30)),
        None,
        "join of the canceled fiber must not complete"
    );
}

#[test]
fn pure_acquire_and_unit_release_reduce_to_use() {
    let direct = Effect::<_, String>::pure(7).and_then(|x| Effect::pure(x * 3));
    let bracketed = Effect::<_, String>::pure(7)
        .bracket(|x| Effect::pure(*x * 3), |_| Effect::unit());
    assert_eq!(bracketed.unsafe_run_sync(), direct.unsafe_run_sync());
}

#[test]
fn failing_acquire_skips_release_entirely() {
    let log = exit_log();
    let effect = Effect::<&'static str, String>::raise_error("no resource".into())
        .bracket_case(|_| Effect::pure(1), logging_release(log.clone()));

    assert_eq!(effect.unsafe_run_sync(), Err("no resource".to_string()));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn use_error_wins_over_release_error_which_is_reported() {
    let reporter = CaptureReporter::install();
    let effect = Effect::<_, String>::pure("resource").bracket_case(
        |_| Effect::<i32, String>::raise_error("primary-use-error".into()),
        |_, _| Effect::raise_error("secondary-release-error".into()),
    );

    assert_eq!(effect.unsafe_run_sync(), Err("primary-use-error".to_string()));
    assert!(
        reporter.contains("secondary-release-error"),
        "the release failure must reach the sink"
    );
}

#[test]
fn release_error_on_success_is_reported_and_the_value_stands() {
    let reporter = CaptureReporter::install();
    let effect = Effect::<_, String>::pure(9).bracket_case(
        |v| Effect::pure(*v * 2),
        |_, _| Effect::raise_error("success-path-release-error".into()),
    );

    assert_eq!(effect.unsafe_run_sync(), Ok(18));
    assert!(reporter.contains("success-path-release-error"));
}

#[test]
fn cancel_during_async_use_releases_exactly_once() {
    let log = exit_log();
    let release = logging_release(log.clone());

    // use suspends on an async node with no completion source: cancellation
    // is the only way out
    let bracketed = Effect::<_, String>::pure("resource")
        .bracket_case(|_| Effect::<i32, String>::never(), release);

    let program = bracketed.start().and_then(|fiber| {
        let again = fiber.cancel();
        fiber.cancel().and_then(move |_| again)
    });
    assert_eq!(program.unsafe_run_sync(), Ok(()));
    assert_eq!(
        *log.lock().unwrap(),
        vec![ExitCase::Canceled],
        "double cancel must not release twice"
    );
}
