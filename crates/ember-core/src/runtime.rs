use std::sync::{Arc, Mutex};

use crate::ast::Value;
use crate::builtins;
use crate::error::EmberError;
use crate::eval::Evaluator;
use crate::interrupt;
use crate::loader::{ModuleLoader, StaticLoader};
use crate::namespaces::NamespaceRegistry;
use crate::options::EvalOptions;
use crate::profiler;
use crate::protocols::install_core_protocols;
use crate::reader::read_source;
use crate::security::{AllowAll, SecurityPolicy};
use crate::symbols::{CORE_NS, USER_NS};

/// One embedded interpreter: a namespace registry with `core` installed, an
/// evaluator over it, and the module loader.
pub struct RuntimeCtx {
    evaluator: Arc<Evaluator>,
    loader: Arc<dyn ModuleLoader>,
    install_lock: Mutex<()>,
}

impl RuntimeCtx {
    pub fn new(options: EvalOptions) -> Result<Arc<Self>, EmberError> {
        Self::with_parts(options, Arc::new(AllowAll), Arc::new(StaticLoader::new()))
    }

    pub fn with_policy(
        options: EvalOptions,
        security: Arc<dyn SecurityPolicy>,
    ) -> Result<Arc<Self>, EmberError> {
        Self::with_parts(options, security, Arc::new(StaticLoader::new()))
    }

    pub fn with_loader(
        options: EvalOptions,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Arc<Self>, EmberError> {
        Self::with_parts(options, Arc::new(AllowAll), loader)
    }

    pub fn with_parts(
        options: EvalOptions,
        security: Arc<dyn SecurityPolicy>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Arc<Self>, EmberError> {
        let registry = Arc::new(NamespaceRegistry::new());
        builtins::install(&registry)?;
        install_core_protocols(&registry)?;
        registry.mark_system(CORE_NS);
        registry.set_sealing(options.seal_system_ns);
        registry.ensure(USER_NS);
        if options.profile {
            profiler::set_enabled(true);
        }
        let evaluator = Evaluator::new(registry, options, security);
        Ok(Arc::new(Self {
            evaluator,
            loader,
            install_lock: Mutex::new(()),
        }))
    }

    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        self.evaluator.registry()
    }

    /// Read and evaluate every form of `source` at top level. A pending
    /// interrupt from an earlier evaluation is cleared first.
    pub fn eval_source(&self, source: &str) -> Result<Value, EmberError> {
        interrupt::begin_evaluation();
        let forms = read_source(source)?;
        self.evaluator.eval_forms(&forms)
    }

    /// Load a module once. Its forms run in `user` unless they switch
    /// namespace; the caller's namespace is restored afterwards.
    pub fn load_module(&self, name: &str) -> Result<(), EmberError> {
        let _install = self.install_lock.lock().unwrap();
        self.evaluator
            .security()
            .validate("load-module", &[Value::string(name)])?;
        if self.evaluator.is_module_loaded(name) {
            log::debug!("module {} already loaded", name);
            return Ok(());
        }
        let forms = self.loader.load(name)?;
        interrupt::begin_evaluation();
        {
            let _restore = self.evaluator.restore_ns_on_drop();
            self.evaluator.set_current_ns(USER_NS);
            self.evaluator.eval_forms(&forms)?;
        }
        self.evaluator.record_module(name);
        log::debug!("loaded module {} ({} forms)", name, forms.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> EvalOptions {
        EvalOptions {
            seal_system_ns: true,
            suggest_symbols: true,
            profile: false,
            macroexpand_limit: 100,
            default_namespace: USER_NS.to_string(),
        }
    }

    #[test]
    fn modules_load_once_and_restore_namespace() {
        let loader = StaticLoader::new().with_module("counter", "(ns counter) (def n 1)");
        let rt = RuntimeCtx::with_loader(options(), Arc::new(loader)).unwrap();
        rt.eval_source("(ns app)").unwrap();
        rt.load_module("counter").unwrap();
        assert_eq!(rt.evaluator().current_ns(), "app");
        assert_eq!(rt.eval_source("counter/n").unwrap(), Value::Int(1));
        rt.eval_source("(ns counter) (set! n 2) (ns app)").unwrap();
        rt.load_module("counter").unwrap();
        assert_eq!(rt.eval_source("counter/n").unwrap(), Value::Int(2));
        assert_eq!(rt.evaluator().loaded_modules(), vec!["counter".to_string()]);
    }

    #[test]
    fn missing_module_is_an_error() {
        let rt = RuntimeCtx::new(options()).unwrap();
        assert!(rt.load_module("nope").is_err());
        assert!(rt.evaluator().loaded_modules().is_empty());
    }
}
