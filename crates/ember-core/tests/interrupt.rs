mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::runtime;
use ember_core::interrupt::{is_interrupted, request_interrupt};
use ember_core::{EmberError, Value};

// The interrupt flag is process-wide, so every scenario runs in one test.
#[test]
fn interrupts_stop_running_evaluation() {
    let rt = runtime();

    // A host thread keeps asking until the running loop notices.
    let done = Arc::new(AtomicBool::new(false));
    let host_done = Arc::clone(&done);
    let host = thread::spawn(move || {
        while !host_done.load(Ordering::SeqCst) {
            request_interrupt();
            thread::sleep(Duration::from_millis(5));
        }
    });
    let err = rt.eval_source("(loop [i 0] (recur (inc i)))").unwrap_err();
    done.store(true, Ordering::SeqCst);
    host.join().unwrap();
    assert!(matches!(err, EmberError::Interrupted(_)), "{}", err);

    // The next evaluation starts clean.
    assert_eq!(rt.eval_source("(defn f [] 1) (f)").unwrap(), Value::Int(1));

    let caught = rt
        .eval_source("(try (interrupt!) (loop [] (recur)) (catch InterruptedError e :stopped))")
        .unwrap();
    assert_eq!(caught, Value::keyword("stopped"));
    assert!(is_interrupted());

    let not_caught = rt
        .eval_source("(try (interrupt!) (dorun 10 1) (catch Exception e :exception))")
        .unwrap_err();
    assert!(matches!(not_caught, EmberError::Interrupted(_)));

    // A request raised inside one run does not leak into later runs.
    assert_eq!(rt.eval_source("(dorun 3 1)").unwrap(), Value::Nil);
    assert_eq!(rt.eval_source("(f)").unwrap(), Value::Int(1));
    assert!(!is_interrupted());
}
