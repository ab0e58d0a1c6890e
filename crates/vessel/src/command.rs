//! Commands sent to the worker thread.
//!
//! The public API is synchronous: each request carries a bounded reply
//! channel the caller blocks on. The single-consumer command loop is what
//! serializes entry into the isolate, so requests on one worker are
//! processed strictly in submission order.

use std::sync::mpsc::SyncSender;

use crate::error::WorkerError;
use crate::registry::ModuleResolverCallback;

pub(crate) enum WorkerCommand {
    /// Compile and run a classic script.
    LoadScript {
        name: String,
        source: String,
        reply: SyncSender<Result<(), WorkerError>>,
    },

    /// Register a module source and drive the load of its graph, consulting
    /// `resolver` for every import edge.
    LoadModule {
        name: String,
        source: String,
        resolver: ModuleResolverCallback,
        reply: SyncSender<Result<(), WorkerError>>,
    },

    /// Deliver bytes to the script's receive hook and return its reply.
    SendBytes {
        payload: Vec<u8>,
        reply: SyncSender<Result<Vec<u8>, WorkerError>>,
    },

    /// Exit the command loop, dropping the isolate.
    Shutdown,
}
