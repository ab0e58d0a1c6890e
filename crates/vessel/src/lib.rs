//! Embedded V8 workers behind garbage-collection-safe handles.
//!
//! Each [`WorkerHandle`] owns one V8 isolate running on a dedicated OS
//! thread. Engine-invoked callbacks never hold references to host objects;
//! they carry a small integer table index resolved through a process-wide
//! registry, so "the worker is gone" is a checkable table miss instead of a
//! dangling pointer.
//!
//! # Architecture
//!
//! - One thread + one isolate per worker; the thread's command loop is the
//!   per-worker lock around isolate entry
//! - A process-wide registry maps table indices to worker records; native
//!   trampolines (`$send`, `$print`, module resolution) look workers up by
//!   index and no-op when the worker has been disposed
//! - Messages are opaque byte payloads in both directions; replies flow
//!   back synchronously through the same call
//! - `dispose()` is the deterministic release path; `Drop` is the
//!   best-effort fallback, and exactly one of the two runs

mod bindings;
mod command;
mod error;
mod handle;
mod loader;
mod registry;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};

use deno_core::v8;

pub use error::WorkerError;
pub use handle::{WorkerHandle, WorkerOptions};
pub use registry::{ModuleResolverCallback, ReceiveMessageCallback, TableIndex};
pub use worker::init_platform;

/// Identifier of the embedded engine build, e.g. `"13.0.245.12-vessel"`.
pub fn version() -> String {
    format!("{}-vessel", v8::V8::get_version())
}

static FLAGS_APPLIED: AtomicBool = AtomicBool::new(false);

/// Consume V8 flags from `args`, returning the unrecognized remainder in its
/// original order. Flags are applied to the process-wide engine
/// configuration exactly once; later calls return `args` untouched.
///
/// Call before the first worker is created — V8 ignores most flags set after
/// the platform comes up. Pass `--help` to print the flag list to stdout.
pub fn set_flags(args: Vec<String>) -> Vec<String> {
    if FLAGS_APPLIED.swap(true, Ordering::SeqCst) {
        return args;
    }
    // V8 treats the first element as argv[0] and never consumes it.
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push("UNUSED_BUT_NECESSARY_ARG0".to_string());
    argv.extend(args);
    let mut remaining = v8::V8::set_flags_from_command_line(argv);
    remaining.remove(0);
    remaining
}
