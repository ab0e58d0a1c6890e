//! Flag handling runs in its own test binary: the once-per-process guard is
//! process-wide state, so these assertions cannot share a process with other
//! `set_flags` callers.

#[test]
fn consumes_engine_flags_and_preserves_unknown_args() {
    let remaining = vessel::set_flags(vec![
        "--foo".to_string(),
        "--expose-gc".to_string(),
        "--bar".to_string(),
    ]);
    assert_eq!(remaining, vec!["--foo".to_string(), "--bar".to_string()]);

    // Flags apply exactly once per process; a second call is a passthrough.
    let again = vessel::set_flags(vec!["--expose-gc".to_string(), "--baz".to_string()]);
    assert_eq!(
        again,
        vec!["--expose-gc".to_string(), "--baz".to_string()]
    );
}
