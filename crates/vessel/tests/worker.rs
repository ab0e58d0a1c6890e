//! End-to-end tests against real isolates.
//!
//! Each test builds its own workers; the crate serializes isolate creation
//! internally, so tests are safe to run in parallel within one process.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use vessel::{WorkerError, WorkerHandle};

fn init_tracing() {
    static TRACING: Once = Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[test]
fn table_indices_are_unique_and_strictly_increasing() {
    init_tracing();
    let first = WorkerHandle::new(|_msg| None).unwrap();
    let second = WorkerHandle::new(|_msg| None).unwrap();
    let third = WorkerHandle::new(|_msg| None).unwrap();
    assert!(second.table_index() > first.table_index());
    assert!(third.table_index() > second.table_index());
    first.dispose();
    second.dispose();
    third.dispose();
}

#[test]
fn send_bytes_round_trips_through_the_receive_hook() {
    init_tracing();
    let seen_by_host: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = seen_by_host.clone();
    let worker = WorkerHandle::new(move |msg| {
        seen.lock().unwrap().push(msg.to_vec());
        Some(msg.to_vec())
    })
    .unwrap();

    // The hook forwards the payload back out to the host and replies with
    // whatever the host returned.
    worker
        .load(
            "echo.js",
            r#"
            Vessel.recv((buf) => {
                return Vessel.send(buf);
            });
            "#,
        )
        .unwrap();

    let reply = worker.send_bytes(b"hello, isolate").unwrap();
    assert_eq!(reply, b"hello, isolate");

    // The nested host callback observed the payload unmodified.
    let seen = seen_by_host.lock().unwrap();
    assert_eq!(seen.as_slice(), &[b"hello, isolate".to_vec()]);
    drop(seen);

    worker.dispose();
}

#[test]
fn sequential_sends_are_processed_in_order() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    worker
        .load(
            "counter.js",
            r#"
            let count = 0;
            Vessel.recv((buf) => {
                count += 1;
                return new Uint8Array([count, buf[0]]);
            });
            "#,
        )
        .unwrap();

    for i in 1..=5u8 {
        let reply = worker.send_bytes(&[i * 10]).unwrap();
        assert_eq!(reply, vec![i, i * 10]);
    }
    worker.dispose();
}

#[test]
fn hook_returning_undefined_yields_an_empty_reply() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    worker
        .load("sink.js", "Vessel.recv((buf) => {});")
        .unwrap();
    let reply = worker.send_bytes(b"dropped").unwrap();
    assert!(reply.is_empty());
    worker.dispose();
}

#[test]
fn send_bytes_without_a_receive_hook_fails() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    let err = worker.send_bytes(b"nobody home").unwrap_err();
    match err {
        WorkerError::Execution(message) => {
            assert!(message.contains("no receive hook registered"), "{message}")
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    worker.dispose();
}

#[test]
fn script_errors_carry_the_engine_diagnostic() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    let err = worker
        .load("bad.js", "throw new Error('deliberate failure');")
        .unwrap_err();
    match err {
        WorkerError::Execution(message) => {
            assert!(message.contains("deliberate failure"), "{message}")
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    // The worker stays usable after a script failure.
    worker.load("good.js", "1 + 1;").unwrap();
    worker.dispose();
}

#[test]
fn modules_resolve_against_previously_loaded_dependencies() {
    init_tracing();
    let resolved: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let worker = WorkerHandle::new(|_msg| None).unwrap();

    worker
        .load_module(
            "dep.js",
            "export function double(x) { return 2 * x; }",
            |_specifier, _referrer| 0,
        )
        .unwrap();

    let log = resolved.clone();
    worker
        .load_module(
            "main.js",
            r#"
            import { double } from "./dep.js";
            Vessel.recv(() => new Uint8Array([double(21)]));
            "#,
            move |specifier, referrer| {
                log.lock()
                    .unwrap()
                    .push((specifier.to_string(), referrer.to_string()));
                if specifier == "./dep.js" { 0 } else { -1 }
            },
        )
        .unwrap();

    let reply = worker.send_bytes(&[]).unwrap();
    assert_eq!(reply, vec![42]);

    // The resolver saw the specifier as written and the referrer's
    // registered name.
    let pairs = resolved.lock().unwrap();
    assert!(pairs.contains(&("./dep.js".to_string(), "main.js".to_string())));
    drop(pairs);

    worker.dispose();
}

#[test]
fn unresolved_imports_fail_the_whole_load() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    let err = worker
        .load_module(
            "broken.js",
            r#"
            import { missing } from "./missing.js";
            Vessel.recv(() => new Uint8Array([1]));
            "#,
            |_specifier, _referrer| -1,
        )
        .unwrap_err();
    match err {
        WorkerError::ModuleResolution(message) => {
            assert!(message.contains("missing.js"), "{message}")
        }
        other => panic!("expected a module resolution error, got {other:?}"),
    }

    // Nothing from the failed graph became callable: the hook it would have
    // registered is absent.
    let err = worker.send_bytes(&[]).unwrap_err();
    assert!(matches!(err, WorkerError::Execution(_)));
    worker.dispose();
}

#[test]
fn operations_after_dispose_are_rejected() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    worker.dispose();
    assert!(matches!(
        worker.load("late.js", "1;"),
        Err(WorkerError::UseAfterDispose)
    ));
    assert!(matches!(
        worker.load_module("late.js", "export {};", |_s, _r| 0),
        Err(WorkerError::UseAfterDispose)
    ));
    assert!(matches!(
        worker.send_bytes(b"late"),
        Err(WorkerError::UseAfterDispose)
    ));
    assert!(matches!(
        worker.terminate_execution(),
        Err(WorkerError::UseAfterDispose)
    ));
}

#[test]
#[should_panic(expected = "already disposed")]
fn double_dispose_is_fatal() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    worker.dispose();
    worker.dispose();
}

#[test]
fn workers_proceed_independently() {
    init_tracing();
    let ping = WorkerHandle::new(|msg| Some(msg.to_vec())).unwrap();
    let pong = WorkerHandle::new(|msg| Some(msg.to_vec())).unwrap();
    let script = "Vessel.recv((buf) => Vessel.send(buf));";
    ping.load("ping.js", script).unwrap();
    pong.load("pong.js", script).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..50u8 {
                assert_eq!(ping.send_bytes(&[i]).unwrap(), vec![i]);
            }
        });
        scope.spawn(|| {
            for i in 0..50u8 {
                assert_eq!(pong.send_bytes(&[i]).unwrap(), vec![i]);
            }
        });
    });

    ping.dispose();
    pong.dispose();
}

#[test]
fn create_dispose_stress_does_not_crash() {
    init_tracing();
    for round in 0..8u8 {
        let worker = WorkerHandle::new(|msg| Some(msg.to_vec())).unwrap();
        worker
            .load("stress.js", "Vessel.recv((buf) => Vessel.send(buf));")
            .unwrap();
        assert_eq!(worker.send_bytes(&[round]).unwrap(), vec![round]);
        if round % 2 == 0 {
            worker.dispose();
        }
        // Odd rounds drop the handle undisposed, exercising the fallback
        // release path.
    }
}

#[test]
fn terminate_execution_interrupts_a_spinning_script() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    std::thread::scope(|scope| {
        let spinner = scope.spawn(|| worker.load("spin.js", "for (;;) {}"));
        std::thread::sleep(Duration::from_millis(300));
        worker.terminate_execution().unwrap();
        let result = spinner.join().expect("load thread panicked");
        assert!(result.is_err());
    });
    worker.dispose();
}

#[test]
fn structured_payloads_survive_the_byte_channel() {
    init_tracing();
    let worker = WorkerHandle::new(|_msg| None).unwrap();
    worker
        .load(
            "adder.js",
            r#"
            Vessel.recv((buf) => {
                const request = JSON.parse(String.fromCharCode(...buf));
                const response = JSON.stringify({ sum: request.a + request.b });
                return Uint8Array.from(response, (c) => c.charCodeAt(0));
            });
            "#,
        )
        .unwrap();

    let request = serde_json::json!({ "a": 2, "b": 40 });
    let reply = worker
        .send_bytes(serde_json::to_string(&request).unwrap().as_bytes())
        .unwrap();
    let response: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(response["sum"], 42);
    worker.dispose();
}
