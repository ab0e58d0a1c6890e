//! Native bindings installed into each isolate.
//!
//! The trampolines here are plain function items: V8 invokes them without
//! any host context beyond the function *data* slot, which carries the
//! worker's table index. Each invocation looks the worker up in the
//! registry and dispatches to the registered callback; a miss means the
//! worker was disposed and the call degrades to a no-op.

use deno_core::v8;
use deno_core::JsRuntime;

use crate::registry::{self, TableIndex};

pub(crate) const BOOTSTRAP_SCRIPT: &str = include_str!("bootstrap.js");

/// Attach `$send`/`$print` to the isolate global and run the bootstrap shim
/// that wraps them in the `Vessel` namespace.
pub(crate) fn install(js_runtime: &mut JsRuntime, index: TableIndex) -> Result<(), String> {
    {
        let scope = &mut js_runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);
        let data: v8::Local<v8::Value> = v8::Integer::new_from_unsigned(scope, index).into();

        let send_fn = v8::Function::builder(send_trampoline)
            .data(data)
            .build(scope)
            .ok_or("failed to build the $send binding")?;
        let send_key =
            v8::String::new(scope, "$send").ok_or("failed to intern the $send binding name")?;
        global.set(scope, send_key.into(), send_fn.into());

        let print_fn = v8::Function::builder(print_trampoline)
            .data(data)
            .build(scope)
            .ok_or("failed to build the $print binding")?;
        let print_key =
            v8::String::new(scope, "$print").ok_or("failed to intern the $print binding name")?;
        global.set(scope, print_key.into(), print_fn.into());
    }

    js_runtime
        .execute_script("vessel:bootstrap", BOOTSTRAP_SCRIPT)
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// `Vessel.send(bytes)`: dispatch bytes from scripted code to the host's
/// receive callback; the callback's reply becomes the return value.
fn send_trampoline(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let Some(index) = args.data().uint32_value(scope) else {
        return;
    };
    let Some(record) = registry::lookup(index) else {
        tracing::debug!(index, "send from a disposed worker; dropping payload");
        return;
    };
    let Some(payload) = value_to_bytes(scope, args.get(0)) else {
        throw_type_error(scope, "Vessel.send expects an ArrayBuffer or a typed array");
        return;
    };
    if let Some(reply) = record.receive(&payload) {
        match bytes_to_uint8array(scope, &reply) {
            Some(buffer) => rv.set(buffer.into()),
            None => throw_type_error(scope, "failed to allocate the reply buffer"),
        }
    }
}

/// `Vessel.print(...)`: surface script output through the host's logging.
fn print_trampoline(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let index = args.data().uint32_value(scope);
    let mut line = String::new();
    for i in 0..args.length() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&args.get(i).to_rust_string_lossy(scope));
    }
    tracing::info!(target: "vessel::script", worker = index, "{line}");
}

fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(text) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, text);
        scope.throw_exception(exception);
    }
}

/// Copy an `ArrayBuffer` or any typed-array view out of the isolate.
pub(crate) fn value_to_bytes(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
) -> Option<Vec<u8>> {
    if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
        let mut bytes = vec![0u8; view.byte_length()];
        let copied = view.copy_contents(&mut bytes);
        bytes.truncate(copied);
        return Some(bytes);
    }
    if let Ok(buffer) = v8::Local::<v8::ArrayBuffer>::try_from(value) {
        let len = buffer.byte_length();
        let mut bytes = vec![0u8; len];
        if len > 0 {
            let store = buffer.get_backing_store();
            let data = store.data()?;
            // SAFETY: `data` points at `len` readable bytes and the backing
            // store outlives this copy.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().cast::<u8>(),
                    bytes.as_mut_ptr(),
                    len,
                );
            }
        }
        return Some(bytes);
    }
    None
}

/// Copy host bytes into the isolate as a `Uint8Array`.
pub(crate) fn bytes_to_uint8array<'s>(
    scope: &mut v8::HandleScope<'s>,
    bytes: &[u8],
) -> Option<v8::Local<'s, v8::Uint8Array>> {
    let store =
        v8::ArrayBuffer::new_backing_store_from_boxed_slice(bytes.to_vec().into_boxed_slice())
            .make_shared();
    let buffer = v8::ArrayBuffer::with_backing_store(scope, &store);
    v8::Uint8Array::new(scope, buffer, 0, bytes.len())
}

/// Interpret the receive hook's return value as reply bytes. `undefined`
/// and `null` mean "empty reply".
pub(crate) fn reply_bytes(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
) -> Result<Vec<u8>, String> {
    if value.is_null_or_undefined() {
        return Ok(Vec::new());
    }
    value_to_bytes(scope, value).ok_or_else(|| {
        "receive hook must return an ArrayBuffer, a typed array, or undefined".to_string()
    })
}

/// Format a caught exception as a one-line diagnostic with the script
/// resource and line number when V8 provides them.
pub(crate) fn exception_message(tc: &mut v8::TryCatch<v8::HandleScope>) -> String {
    let Some(exception) = tc.exception() else {
        return "unknown JavaScript exception".to_string();
    };
    let text = exception.to_rust_string_lossy(tc);
    match tc.message() {
        Some(message) => {
            let resource = message
                .get_script_resource_name(tc)
                .map(|name| name.to_rust_string_lossy(tc))
                .unwrap_or_else(|| "<anonymous>".to_string());
            let line = message.get_line_number(tc).unwrap_or(0);
            format!("{resource}:{line}: {text}")
        }
        None => text,
    }
}
