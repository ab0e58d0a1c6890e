//! Module resolution across the engine boundary.
//!
//! The loader given to each `JsRuntime` holds nothing but the worker's table
//! index. Every resolve and load goes back through the registry, so a worker
//! disposed mid-flight degrades to a resolution failure instead of a
//! dangling reference.
//!
//! Worker module names live under a synthetic URL root: a module registered
//! as `dep.js` is known to the engine as `vessel://module/dep.js`. Relative
//! specifiers resolve against their referrer; bare specifiers resolve
//! against the root. The host resolver always sees the specifier as written
//! in source and the *registered name* of the referrer.

use deno_core::error::AnyError;
use deno_core::url::Url;
use deno_core::{
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier, ModuleType,
    RequestedModuleType, ResolutionKind,
};

use crate::registry::{self, TableIndex};

/// URL namespace for worker-registered module names.
pub(crate) const MODULE_ROOT: &str = "vessel://module/";

/// Engine-to-host module resolution entry point. Returns the host resolver's
/// token; any negative value means "not found". Tolerates indices whose
/// worker has been disposed and loads that never installed a resolver (a
/// dynamic `import()` from a classic script, for example).
pub(crate) fn resolve_module(specifier: &str, referrer: &str, index: TableIndex) -> i32 {
    let Some(record) = registry::lookup(index) else {
        tracing::debug!(index, specifier, "module resolution for a disposed worker");
        return -1;
    };
    let Some(resolver) = record.resolver() else {
        tracing::debug!(index, specifier, "no module resolver installed");
        return -1;
    };
    resolver(specifier, referrer)
}

/// Map a registered module name to its engine-side specifier.
pub(crate) fn module_specifier(name: &str) -> Result<ModuleSpecifier, String> {
    let root = Url::parse(MODULE_ROOT).expect("module root URL is well-formed");
    root.join(name)
        .map_err(|err| format!("invalid module name {name:?}: {err}"))
}

/// Strip the synthetic root from an engine-side specifier, recovering the
/// name the module was registered under.
pub(crate) fn module_name(specifier: &str) -> &str {
    specifier.strip_prefix(MODULE_ROOT).unwrap_or(specifier)
}

pub(crate) struct WorkerModuleLoader {
    index: TableIndex,
}

impl WorkerModuleLoader {
    pub(crate) fn new(index: TableIndex) -> Self {
        Self { index }
    }

    fn note_failure(&self, detail: &str) {
        if let Some(record) = registry::lookup(self.index) {
            record.note_resolve_failure(detail);
        }
    }
}

impl ModuleLoader for WorkerModuleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, AnyError> {
        let referrer_name = module_name(referrer).to_string();
        let token = resolve_module(specifier, &referrer_name, self.index);
        if token < 0 {
            let detail = format!(
                "cannot resolve {specifier:?} imported from {referrer_name:?} (token {token})"
            );
            self.note_failure(&detail);
            return Err(deno_core::error::generic_error(detail));
        }
        // Bare names resolve against the worker's module root.
        match deno_core::resolve_import(specifier, referrer) {
            Ok(resolved) => Ok(resolved),
            Err(_) => module_specifier(specifier).map_err(deno_core::error::generic_error),
        }
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let name = module_name(module_specifier.as_str()).to_string();
        let source = registry::lookup(self.index).and_then(|record| record.module_source(&name));
        let result = match source {
            Some(code) => Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            )),
            None => {
                let detail = format!("module {name:?} has not been loaded into this worker");
                self.note_failure(&detail);
                Err(deno_core::error::generic_error(detail))
            }
        };
        ModuleLoadResponse::Sync(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_module_root() {
        let specifier = module_specifier("main.js").unwrap();
        assert_eq!(specifier.as_str(), "vessel://module/main.js");
        assert_eq!(module_name(specifier.as_str()), "main.js");
    }

    #[test]
    fn relative_imports_resolve_against_their_referrer() {
        let resolved =
            deno_core::resolve_import("./dep.js", "vessel://module/main.js").unwrap();
        assert_eq!(resolved.as_str(), "vessel://module/dep.js");
    }

    #[test]
    fn foreign_specifiers_pass_through_module_name() {
        assert_eq!(module_name("https://example.com/x.js"), "https://example.com/x.js");
    }

    #[test]
    fn resolution_against_a_disposed_index_fails_without_crashing() {
        assert!(resolve_module("./dep.js", "main.js", TableIndex::MAX) < 0);
    }
}
