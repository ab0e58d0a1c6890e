//! Worker thread: owns the isolate and serves the command loop.
//!
//! Each worker runs on a dedicated OS thread with a current-thread tokio
//! runtime. The isolate is created, driven, and dropped entirely on that
//! thread; only its thread-safe [`v8::IsolateHandle`] ever leaves it. The
//! single-consumer command loop is the per-worker lock around isolate
//! entry — callbacks invoked from inside the isolate (receive hook, module
//! resolver) run on this same thread, so re-entry needs no further locking.

use std::rc::Rc;
use std::sync::mpsc::SyncSender;
use std::sync::{Mutex, Once};

use deno_core::v8;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use tokio::sync::mpsc;

use crate::bindings;
use crate::command::WorkerCommand;
use crate::error::WorkerError;
use crate::handle::WorkerOptions;
use crate::loader::{self, WorkerModuleLoader};
use crate::registry::{self, ModuleResolverCallback, TableIndex};

/// Ensure the V8 platform is initialized exactly once.
static V8_INIT: Once = Once::new();

/// Serialize isolate creation. Creating multiple isolates concurrently can
/// crash V8.
static ISOLATE_CREATE_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the V8 platform. Called automatically before the first worker
/// is created; safe to call repeatedly.
pub fn init_platform() {
    V8_INIT.call_once(|| {
        JsRuntime::init_platform(None, false);
    });
}

/// The loop that runs inside each worker thread.
pub(crate) async fn run_worker(
    index: TableIndex,
    options: WorkerOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    init_tx: SyncSender<Result<v8::IsolateHandle, String>>,
) {
    let mut js_runtime = {
        let _lock = ISOLATE_CREATE_LOCK.lock().unwrap();
        tracing::debug!(index, "creating isolate");
        JsRuntime::new(RuntimeOptions {
            module_loader: Some(Rc::new(WorkerModuleLoader::new(index))),
            create_params: options.create_params(),
            ..Default::default()
        })
    };
    let isolate_handle = js_runtime.v8_isolate().thread_safe_handle();

    if let Err(message) = bindings::install(&mut js_runtime, index) {
        let _ = init_tx.send(Err(message));
        return;
    }
    let _ = init_tx.send(Ok(isolate_handle));
    tracing::debug!(index, "worker ready");

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            WorkerCommand::LoadScript { name, source, reply } => {
                let _ = reply.send(load_script(&mut js_runtime, name, source).await);
            }
            WorkerCommand::LoadModule {
                name,
                source,
                resolver,
                reply,
            } => {
                let _ = reply.send(load_module(&mut js_runtime, index, name, source, resolver).await);
            }
            WorkerCommand::SendBytes { payload, reply } => {
                let _ = reply.send(dispatch_message(&mut js_runtime, &payload));
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!(index, "worker loop exited");
}

/// Run a classic script to completion, surfacing the engine diagnostic on
/// failure.
async fn load_script(
    js_runtime: &mut JsRuntime,
    name: String,
    source: String,
) -> Result<(), WorkerError> {
    // execute_script wants a 'static name; loads are few and names small.
    let name: &'static str = Box::leak(name.into_boxed_str());
    js_runtime
        .execute_script(name, source)
        .map_err(|err| WorkerError::Execution(err.to_string()))?;
    js_runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|err| WorkerError::Execution(err.to_string()))?;
    Ok(())
}

/// Register a module source on the worker record, then drive the load of
/// its graph with the given resolver installed. Rolls the registration back
/// on failure and classifies resolution failures separately from script
/// errors.
async fn load_module(
    js_runtime: &mut JsRuntime,
    index: TableIndex,
    name: String,
    source: String,
    resolver: ModuleResolverCallback,
) -> Result<(), WorkerError> {
    let Some(record) = registry::lookup(index) else {
        return Err(WorkerError::UseAfterDispose);
    };
    let specifier = loader::module_specifier(&name).map_err(WorkerError::Execution)?;
    tracing::debug!(index = record.index(), module = %name, "loading module graph");

    record.register_module(&name, source);
    record.install_resolver(resolver);
    record.clear_resolve_failure();

    let result = drive_module_load(js_runtime, &specifier).await;

    record.clear_resolver();
    match result {
        Ok(()) => Ok(()),
        Err(message) => {
            record.unregister_module(&name);
            match record.take_resolve_failure() {
                Some(detail) => Err(WorkerError::ModuleResolution(detail)),
                None => Err(WorkerError::Execution(message)),
            }
        }
    }
}

async fn drive_module_load(
    js_runtime: &mut JsRuntime,
    specifier: &deno_core::ModuleSpecifier,
) -> Result<(), String> {
    let module_id = js_runtime
        .load_side_es_module(specifier)
        .await
        .map_err(|err| err.to_string())?;
    let evaluated = js_runtime.mod_evaluate(module_id);
    js_runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|err| err.to_string())?;
    evaluated.await.map_err(|err| err.to_string())
}

/// Deliver bytes to the script's receive hook and marshal its reply back.
/// The hook runs synchronously on this thread and may itself call
/// `Vessel.send`, re-entering the host through the send trampoline before
/// this call returns.
fn dispatch_message(js_runtime: &mut JsRuntime, payload: &[u8]) -> Result<Vec<u8>, WorkerError> {
    let scope = &mut js_runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);

    let context = tc.get_current_context();
    let global = context.global(tc);
    let key = v8::String::new(tc, "$dispatchMessage")
        .ok_or_else(|| WorkerError::Execution("failed to intern the dispatch key".to_string()))?;
    let dispatch = global
        .get(tc, key.into())
        .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok())
        .ok_or_else(|| {
            WorkerError::Execution("message dispatch hook missing from the isolate".to_string())
        })?;

    let buffer = bindings::bytes_to_uint8array(tc, payload)
        .ok_or_else(|| WorkerError::Execution("failed to allocate the message buffer".to_string()))?;
    let result = dispatch.call(tc, global.into(), &[buffer.into()]);

    if tc.has_caught() {
        return Err(WorkerError::Execution(bindings::exception_message(tc)));
    }
    let value = result.ok_or_else(|| {
        WorkerError::Execution("message dispatch returned no value".to_string())
    })?;
    bindings::reply_bytes(tc, value).map_err(WorkerError::Execution)
}
