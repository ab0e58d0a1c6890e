//! The managed-facing worker handle.
//!
//! A [`WorkerHandle`] is the only object callers hold for an isolate. Its
//! lifecycle is `Created` (registry entry exists, isolate still coming up
//! inside [`WorkerHandle::new`]) → `Active` (what `new` returns) →
//! `Disposed` (terminal). Explicit [`WorkerHandle::dispose`] is the
//! deterministic cleanup path; `Drop` performs the same teardown as a
//! fallback for handles that were never disposed, and the `disposed` flag
//! guarantees the isolate is released by exactly one of the two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use deno_core::v8;
use tokio::sync::mpsc;

use crate::command::WorkerCommand;
use crate::error::WorkerError;
use crate::registry::{self, TableIndex};
use crate::worker;

/// Isolate tuning knobs for [`WorkerHandle::with_options`].
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Worker thread name; defaults to `vessel-worker-<index>`.
    pub name: Option<String>,
    /// Initial heap size in bytes. Requires `max_heap_size`.
    pub initial_heap_size: Option<usize>,
    /// Hard heap limit in bytes.
    pub max_heap_size: Option<usize>,
}

impl WorkerOptions {
    fn validate(&self) -> Result<(), WorkerError> {
        if self.initial_heap_size.is_some() && self.max_heap_size.is_none() {
            return Err(WorkerError::Config(
                "initial_heap_size requires max_heap_size to be set as well".to_string(),
            ));
        }
        if let (Some(initial), Some(max)) = (self.initial_heap_size, self.max_heap_size) {
            if initial > max {
                return Err(WorkerError::Config(format!(
                    "initial_heap_size ({initial}) cannot exceed max_heap_size ({max})"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn create_params(&self) -> Option<v8::CreateParams> {
        self.max_heap_size.map(|max| {
            v8::CreateParams::default().heap_limits(self.initial_heap_size.unwrap_or(0), max)
        })
    }
}

/// Handle to one embedded isolate.
pub struct WorkerHandle {
    index: TableIndex,
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    /// Thread-safe V8 handle, usable from any thread for termination.
    isolate_handle: v8::IsolateHandle,
    disposed: AtomicBool,
    thread_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Create a worker with default options. `recv` is invoked — on the
    /// worker thread — whenever scripted code calls `Vessel.send`; its
    /// return value is the script's reply.
    ///
    /// The callback must not call back into this same worker (the worker
    /// thread is busy dispatching it); other workers are fine.
    pub fn new(
        recv: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Result<Self, WorkerError> {
        Self::with_options(WorkerOptions::default(), recv)
    }

    /// Create a worker with explicit options.
    pub fn with_options(
        options: WorkerOptions,
        recv: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Result<Self, WorkerError> {
        options.validate()?;
        worker::init_platform();

        let index = registry::register(Arc::new(recv));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = sync_channel::<Result<v8::IsolateHandle, String>>(1);

        let thread_name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("vessel-worker-{index}"));
        let spawned = thread::Builder::new().name(thread_name).spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = init_tx.send(Err(format!("failed to build worker runtime: {err}")));
                    return;
                }
            };
            rt.block_on(worker::run_worker(index, options, cmd_rx, init_tx));
        });

        let thread_handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                registry::remove(index);
                return Err(WorkerError::SpawnFailed(err));
            }
        };

        match init_rx.recv() {
            Ok(Ok(isolate_handle)) => {
                tracing::debug!(index, "worker active");
                Ok(Self {
                    index,
                    cmd_tx,
                    isolate_handle,
                    disposed: AtomicBool::new(false),
                    thread_handle: Mutex::new(Some(thread_handle)),
                })
            }
            Ok(Err(message)) => {
                let _ = thread_handle.join();
                registry::remove(index);
                Err(WorkerError::Execution(message))
            }
            Err(_) => {
                let _ = thread_handle.join();
                registry::remove(index);
                Err(WorkerError::ChannelClosed)
            }
        }
    }

    /// The registry key this worker is known by across the engine boundary.
    pub fn table_index(&self) -> TableIndex {
        self.index
    }

    /// Compile and run a classic script scoped to this worker's isolate.
    pub fn load(&self, script_name: &str, source: &str) -> Result<(), WorkerError> {
        let name = script_name.to_string();
        let source = source.to_string();
        self.request(|reply| WorkerCommand::LoadScript { name, source, reply })
    }

    /// Load and evaluate a module. Every `import` encountered consults
    /// `resolver` with `(specifier, referrer_name)` before execution; any
    /// negative token fails the whole load. Import dependencies must have
    /// been loaded by prior `load_module` calls.
    pub fn load_module(
        &self,
        script_name: &str,
        source: &str,
        resolver: impl Fn(&str, &str) -> i32 + Send + Sync + 'static,
    ) -> Result<(), WorkerError> {
        let name = script_name.to_string();
        let source = source.to_string();
        let resolver: crate::ModuleResolverCallback = Arc::new(resolver);
        self.request(|reply| WorkerCommand::LoadModule {
            name,
            source,
            resolver,
            reply,
        })
    }

    /// Deliver bytes to the script's receive hook and return its reply
    /// (empty when the hook returned `undefined`). The hook may call
    /// `Vessel.send` before returning, re-entering the host callback.
    pub fn send_bytes(&self, message: &[u8]) -> Result<Vec<u8>, WorkerError> {
        let payload = message.to_vec();
        self.request(|reply| WorkerCommand::SendBytes { payload, reply })
    }

    /// Ask V8 to abort in-flight — or the next — execution at its next safe
    /// point. Best-effort: returning does not mean execution has stopped.
    /// Callable from any thread.
    pub fn terminate_execution(&self) -> Result<(), WorkerError> {
        self.ensure_live()?;
        self.isolate_handle.terminate_execution();
        Ok(())
    }

    /// Release the isolate and remove the worker from the table.
    ///
    /// Panics when called twice: a second dispose means a double-free of a
    /// native resource and is never silently ignored.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            panic!("worker already disposed");
        }
        self.dispose_inner();
    }

    fn ensure_live(&self) -> Result<(), WorkerError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(WorkerError::UseAfterDispose)
        } else {
            Ok(())
        }
    }

    fn request<T>(
        &self,
        make_cmd: impl FnOnce(SyncSender<Result<T, WorkerError>>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        self.ensure_live()?;
        let (reply_tx, reply_rx) = sync_channel(1);
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.recv().map_err(|_| WorkerError::ChannelClosed)?
    }

    fn dispose_inner(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown);
        // Unstick any script still running so the loop can see the shutdown.
        self.isolate_handle.terminate_execution();
        if let Some(handle) = self.thread_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        registry::remove(self.index);
        tracing::debug!(index = self.index, "worker disposed");
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Fallback release path for handles never explicitly disposed. The
        // swap keeps the two paths mutually exclusive.
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.dispose_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_heap_size_requires_a_max() {
        let options = WorkerOptions {
            initial_heap_size: Some(1 << 20),
            ..Default::default()
        };
        let result = WorkerHandle::with_options(options, |_msg| None);
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }

    #[test]
    fn initial_heap_size_may_not_exceed_the_max() {
        let options = WorkerOptions {
            initial_heap_size: Some(2 << 20),
            max_heap_size: Some(1 << 20),
            ..Default::default()
        };
        let result = WorkerHandle::with_options(options, |_msg| None);
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }
}
