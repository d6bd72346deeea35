use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use im::{HashMap, HashSet, Vector};

use crate::ast::{FnArity, Key, MetaMap, Symbol, Value};
use crate::builtins::get_value;
use crate::destructure::bind_pattern;
use crate::dynamic_vars;
use crate::env::{child_of, new_ref, Env, EnvRef};
use crate::error::EmberError;
use crate::fn_builder::{build_fn, parse_clauses, FnClause, Lambda};
use crate::interrupt::check_for_interrupt;
use crate::monitor::MonitorTable;
use crate::multimethods::MultiMethod;
use crate::namespaces::{NamespaceRegistry, Var, VarFlags};
use crate::options::EvalOptions;
use crate::profiler;
use crate::protocols::{extend_type, install_protocol, MethodSpec, Protocol};
use crate::quasiquote;
use crate::security::SecurityPolicy;
use crate::special_forms::{self, SpecialForm};
use crate::symbols::{gensym, qualify, split_qualified, suggestions, CORE_NS};
use crate::try_form::{parse_try, resolve_selector, CatchBlock, TryPlan};
use crate::type_registry::{
    construct, conforms, lookup_type_name, parse_alternatives, parse_fields, resolve_type_name,
    runtime_type, type_chain, CustomData, CustomKind, CustomTypeDef,
};

static RECUR_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static ACTIVE: RefCell<Vec<Weak<Evaluator>>> = RefCell::new(Vec::new());
}

fn next_recur_target() -> usize {
    RECUR_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Apply `f` with the evaluator active on this thread. Native code (builtins,
/// type validators) calls back into user functions through this.
pub fn call_value(f: &Value, args: &[Value]) -> Result<Value, EmberError> {
    if let Value::Func(native) = f {
        return native.call(args);
    }
    let evaluator = ACTIVE
        .with(|stack| stack.borrow().last().and_then(Weak::upgrade))
        .ok_or_else(|| EmberError::runtime("no evaluator is active on this thread"))?;
    evaluator.apply(f, args.to_vec())
}

pub struct ActiveGuard {
    _private: (),
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Puts the current namespace back on every exit path.
pub struct NamespaceRestore<'a> {
    evaluator: &'a Evaluator,
    saved: String,
}

impl Drop for NamespaceRestore<'_> {
    fn drop(&mut self) {
        self.evaluator.set_current_ns(&self.saved);
    }
}

enum VarTarget {
    Local(String),
    Global(Arc<Var>),
    Unbound(String),
}

fn expect_args(form: SpecialForm, args: &[Value], arity: FnArity) -> Result<(), EmberError> {
    if arity.accepts(args.len()) {
        Ok(())
    } else {
        Err(EmberError::arity(format!(
            "{} expects {} arguments, got {}",
            form.name(),
            arity.describe(),
            args.len()
        )))
    }
}

fn kw(name: &str) -> Key {
    Key::keyword(name)
}

fn name_arg(value: &Value) -> Result<String, EmberError> {
    match value {
        Value::Symbol(sym) => Ok(sym.qualified()),
        Value::String(s) => Ok(s.clone()),
        Value::Keyword(k) => Ok(k.clone()),
        other => Err(EmberError::expected("name", other)),
    }
}

fn binding_pairs(form: SpecialForm, value: &Value) -> Result<Vec<(Value, Value)>, EmberError> {
    let Value::Vector(items) = value else {
        return Err(EmberError::type_mismatch(format!(
            "{} expects a binding vector, got {}",
            form.name(),
            value.type_name()
        )));
    };
    if items.len() % 2 != 0 {
        return Err(EmberError::runtime(format!(
            "{} requires an even number of forms in the binding vector",
            form.name()
        )));
    }
    let items: Vec<Value> = items.iter().cloned().collect();
    Ok(items
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

fn flags_from_meta(meta: &MetaMap, flags: &mut VarFlags) {
    let set = |name: &str| meta.get(&kw(name)).is_some_and(Value::is_truthy);
    if set("private") {
        flags.private = true;
    }
    if set("dynamic") {
        flags.dynamic = true;
    }
}

fn recur_args(lambda: &Lambda, clause: &FnClause, values: Vec<Value>) -> Result<Vec<Value>, EmberError> {
    let expected = clause.params.len() + usize::from(clause.rest.is_some());
    if values.len() != expected {
        return Err(EmberError::arity(format!(
            "recur in {} expects {} arguments, got {}",
            lambda.display_name(),
            expected,
            values.len()
        )));
    }
    if clause.rest.is_none() {
        return Ok(values);
    }
    let mut values = values;
    let rest = values.pop().unwrap_or(Value::Nil);
    values.extend(rest.to_items()?);
    Ok(values)
}

fn loop_frame(env: &EnvRef, target: usize) -> EnvRef {
    let mut frame = Env::new_child(env.clone());
    frame.mark_recur_target(target);
    new_ref(frame)
}

pub struct Evaluator {
    me: Weak<Evaluator>,
    registry: Arc<NamespaceRegistry>,
    options: EvalOptions,
    security: Arc<dyn SecurityPolicy>,
    current_ns: RwLock<String>,
    monitors: MonitorTable,
    modules: RwLock<Vec<String>>,
}

impl Evaluator {
    pub fn new(
        registry: Arc<NamespaceRegistry>,
        options: EvalOptions,
        security: Arc<dyn SecurityPolicy>,
    ) -> Arc<Self> {
        let ns = options.default_namespace.clone();
        registry.ensure(&ns);
        Arc::new_cyclic(|me| Evaluator {
            me: me.clone(),
            registry,
            options,
            security,
            current_ns: RwLock::new(ns),
            monitors: MonitorTable::new(),
            modules: RwLock::new(Vec::new()),
        })
    }

    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn security(&self) -> &Arc<dyn SecurityPolicy> {
        &self.security
    }

    pub fn current_ns(&self) -> String {
        self.current_ns.read().unwrap().clone()
    }

    pub fn set_current_ns(&self, ns: &str) {
        self.registry.ensure(ns);
        *self.current_ns.write().unwrap() = ns.to_string();
    }

    pub fn restore_ns_on_drop(&self) -> NamespaceRestore<'_> {
        NamespaceRestore {
            evaluator: self,
            saved: self.current_ns(),
        }
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.modules.read().unwrap().clone()
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.modules.read().unwrap().iter().any(|m| m == name)
    }

    pub fn record_module(&self, name: &str) {
        let mut modules = self.modules.write().unwrap();
        if !modules.iter().any(|m| m == name) {
            modules.push(name.to_string());
        }
    }

    /// Make this evaluator the target of `call_value` on this thread.
    pub fn activate(&self) -> ActiveGuard {
        ACTIVE.with(|stack| stack.borrow_mut().push(self.me.clone()));
        ActiveGuard { _private: () }
    }

    /// Fresh top-level frame; globals are resolved through the registry.
    pub fn global_env(&self) -> EnvRef {
        new_ref(Env::default())
    }

    pub fn evaluate(&self, form: &Value, env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        let _active = self.activate();
        self.eval(form, env, tail)
    }

    pub fn eval_values(&self, forms: &[Value], env: &EnvRef) -> Result<Vec<Value>, EmberError> {
        let _active = self.activate();
        forms.iter().map(|form| self.eval(form, env, false)).collect()
    }

    /// Evaluate top-level forms in order, returning the last value.
    pub fn eval_forms(&self, forms: &[Value]) -> Result<Value, EmberError> {
        let _active = self.activate();
        let env = self.global_env();
        let mut result = Value::Nil;
        for form in forms {
            result = self.eval(form, &env, false)?;
        }
        Ok(result)
    }

    fn eval(&self, form: &Value, env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        match form {
            Value::Symbol(sym) => self.resolve_symbol(sym, env),
            Value::List(items) if items.is_empty() => Ok(form.clone()),
            Value::List(items) => self.eval_list(items, env, tail),
            Value::Vector(items) => {
                let mut out = Vector::new();
                for item in items {
                    out.push_back(self.eval(item, env, false)?);
                }
                Ok(Value::Vector(out))
            }
            Value::Map(map) => {
                let mut out = HashMap::new();
                for (k, v) in map.iter() {
                    let key = Key::from_value(&self.eval(&k.to_value(), env, false)?)?;
                    out.insert(key, self.eval(v, env, false)?);
                }
                Ok(Value::Map(out))
            }
            Value::Set(items) => {
                let mut out = HashSet::new();
                for item in items {
                    out.insert(self.eval(item, env, false)?);
                }
                Ok(Value::Set(out))
            }
            _ => Ok(form.clone()),
        }
    }

    fn eval_list(&self, items: &Vector<Value>, env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        let head = &items[0];
        let args: Vec<Value> = items.iter().skip(1).cloned().collect();
        if let Value::Symbol(sym) = head {
            if sym.ns.is_none() {
                if let Some(form) = SpecialForm::from_name(&sym.name) {
                    return self.eval_special(form, &args, env, tail);
                }
            }
            if let Some(mac) = self.macro_for(sym, env) {
                let expansion = self.apply_lambda(&mac, args)?;
                return self.eval(&expansion, env, tail);
            }
        }
        let f = self.eval(head, env, false)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in &args {
            values.push(self.eval(arg, env, false)?);
        }
        self.apply(&f, values)
    }

    fn eval_body(&self, forms: &[Value], env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        let Some((last, init)) = forms.split_last() else {
            return Ok(Value::Nil);
        };
        for form in init {
            self.eval(form, env, false)?;
        }
        self.eval(last, env, tail)
    }

    /// Namespace globals resolve in: the enclosing function's, else the
    /// current one.
    fn context_ns(&self, env: &EnvRef) -> String {
        env.read()
            .unwrap()
            .namespace()
            .unwrap_or_else(|| self.current_ns())
    }

    fn find_var(&self, sym: &Symbol, ctx_ns: &str) -> Option<Arc<Var>> {
        let visible = |var: &Arc<Var>| !var.is_private() || var.ns() == ctx_ns;
        match &sym.ns {
            Some(ns) => self.registry.lookup(ns, &sym.name).filter(|var| visible(var)),
            None => self.registry.lookup(ctx_ns, &sym.name).or_else(|| {
                self.registry
                    .lookup(CORE_NS, &sym.name)
                    .filter(|var| visible(var))
            }),
        }
    }

    fn macro_for(&self, sym: &Symbol, env: &EnvRef) -> Option<Arc<Lambda>> {
        if sym.ns.is_none() && env.read().unwrap().contains(&sym.name) {
            return None;
        }
        match self.find_var(sym, &self.context_ns(env))?.value() {
            Value::Macro(mac) => Some(mac),
            _ => None,
        }
    }

    fn resolve_symbol(&self, sym: &Symbol, env: &EnvRef) -> Result<Value, EmberError> {
        if sym.ns.is_none() {
            if let Some(value) = env.read().unwrap().get(&sym.name) {
                return Ok(value);
            }
            if sym.name == "*ns*" {
                return Ok(Value::Symbol(Symbol::simple(self.current_ns())));
            }
        }
        let ctx = self.context_ns(env);
        match self.find_var(sym, &ctx) {
            Some(var) => Ok(var.value()),
            None => Err(self.unresolved(sym, env, &ctx)),
        }
    }

    fn unresolved(&self, sym: &Symbol, env: &EnvRef, ctx: &str) -> EmberError {
        let name = sym.qualified();
        if let Some(ns) = &sym.ns {
            if self
                .registry
                .lookup(ns, &sym.name)
                .is_some_and(|var| var.is_private())
            {
                return EmberError::symbol_not_found(format!("{} is private", name));
            }
        }
        let mut message = format!("Unable to resolve symbol: {}", name);
        if self.options.suggest_symbols && sym.ns.is_none() {
            let mut candidates = env.read().unwrap().names();
            candidates.extend(self.registry.var_names(ctx));
            candidates.extend(self.registry.var_names(CORE_NS));
            candidates.extend(special_forms::names().into_iter().map(String::from));
            let found = suggestions(&sym.name, candidates.iter());
            if !found.is_empty() {
                message.push_str(&format!(" (did you mean: {}?)", found.join(", ")));
            }
        }
        EmberError::symbol_not_found(message)
    }

    pub fn apply(&self, f: &Value, args: Vec<Value>) -> Result<Value, EmberError> {
        match f {
            Value::Func(native) => {
                let _prof = profiler::enter(native.name());
                native.call(&args)
            }
            Value::Lambda(lambda) => self.apply_lambda(lambda, args),
            Value::MultiFn(mm) => {
                let dispatch_value = self.apply(&mm.dispatch, args.clone())?;
                let method = mm.find(&dispatch_value)?;
                self.apply(&method, args)
            }
            Value::ProtocolFn(pf) => {
                if !pf.arities.iter().any(|arity| arity.accepts(args.len())) {
                    return Err(EmberError::arity(format!(
                        "{} does not accept {} arguments",
                        pf.name,
                        args.len()
                    )));
                }
                let target = pf.dispatch_target(&self.registry, &args)?;
                self.apply(&target, args)
            }
            Value::Keyword(_) | Value::Map(_) | Value::Set(_) => {
                if args.is_empty() || args.len() > 2 {
                    return Err(EmberError::arity(format!(
                        "{} used as a function expects 1 or 2 arguments, got {}",
                        f.type_name(),
                        args.len()
                    )));
                }
                match f {
                    Value::Keyword(_) => get_value(&args[0], f, args.get(1)),
                    _ => get_value(f, &args[0], args.get(1)),
                }
            }
            Value::Var(var) => self.apply(&var.value(), args),
            Value::TypeDef(def) => construct(&self.registry, def, &args),
            Value::Macro(mac) => Err(EmberError::runtime(format!(
                "cannot take the value of macro {}",
                mac.display_name()
            ))),
            other => Err(EmberError::type_mismatch(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    fn apply_lambda(&self, lambda: &Arc<Lambda>, args: Vec<Value>) -> Result<Value, EmberError> {
        check_for_interrupt()?;
        let _prof = profiler::enter(lambda.display_name());
        let frame_err = |err: EmberError| err.with_frame(lambda.display_name(), Some(lambda.ns.clone()));
        let mut args = args;
        loop {
            let clause = lambda.select_clause(args.len()).map_err(frame_err)?;
            let target = next_recur_target();
            let frame = new_ref(Env::new_call_frame(lambda.env.clone(), &lambda.ns, target));
            let result = self
                .bind_params(lambda, clause, args, &frame)
                .and_then(|()| self.check_preconditions(lambda, clause, &frame))
                .and_then(|()| self.eval_body(&clause.body, &frame, true));
            match result {
                Err(EmberError::RecurSignal { target: t, values }) if t == target => {
                    check_for_interrupt().map_err(frame_err)?;
                    args = recur_args(lambda, clause, values).map_err(frame_err)?;
                }
                Err(err) => return Err(frame_err(err)),
                Ok(value) => return Ok(value),
            }
        }
    }

    fn bind_params(
        &self,
        lambda: &Arc<Lambda>,
        clause: &FnClause,
        args: Vec<Value>,
        frame: &EnvRef,
    ) -> Result<(), EmberError> {
        if let Some(name) = &lambda.name {
            frame
                .write()
                .unwrap()
                .set(name, Value::Lambda(lambda.clone()));
        }
        let mut args = args;
        let rest_values = if args.len() > clause.params.len() {
            args.split_off(clause.params.len())
        } else {
            Vec::new()
        };
        for (param, arg) in clause.params.iter().zip(args) {
            self.bind_into(param, arg, frame)?;
        }
        if let Some(rest) = &clause.rest {
            let rest_value = if rest_values.is_empty() {
                Value::Nil
            } else {
                Value::list(rest_values)
            };
            self.bind_into(rest, rest_value, frame)?;
        }
        Ok(())
    }

    fn check_preconditions(
        &self,
        lambda: &Lambda,
        clause: &FnClause,
        frame: &EnvRef,
    ) -> Result<(), EmberError> {
        for form in &clause.pre {
            if !self.eval(form, frame, false)?.is_truthy() {
                return Err(EmberError::precondition(format!(
                    "{} in {}",
                    form,
                    lambda.display_name()
                )));
            }
        }
        Ok(())
    }

    /// Destructure into `frame`; `:or` defaults see the bindings made so far.
    fn bind_into(&self, pattern: &Value, value: Value, frame: &EnvRef) -> Result<(), EmberError> {
        let mut bindings = Vec::new();
        let mut defaults = |form: &Value| self.eval(form, frame, false);
        bind_pattern(pattern, value, &mut bindings, &mut defaults)?;
        let mut scope = frame.write().unwrap();
        for (name, value) in bindings {
            scope.set(&name, value);
        }
        Ok(())
    }

    fn eval_special(
        &self,
        form: SpecialForm,
        args: &[Value],
        env: &EnvRef,
        tail: bool,
    ) -> Result<Value, EmberError> {
        match form {
            SpecialForm::Gensym => self.eval_gensym(args, env),
            SpecialForm::Doc => self.eval_doc(args, env),
            SpecialForm::Modules => {
                expect_args(form, args, FnArity::exact(0))?;
                Ok(Value::vector(
                    self.loaded_modules().into_iter().map(Value::keyword).collect(),
                ))
            }
            SpecialForm::Fn => {
                let lambda = build_fn(args, env, &self.context_ns(env))?;
                Ok(Value::Lambda(Arc::new(lambda)))
            }
            SpecialForm::Eval => self.eval_eval(args, env),
            SpecialForm::Resolve => self.eval_resolve(args, env),
            SpecialForm::VarGet
            | SpecialForm::VarName
            | SpecialForm::VarNs
            | SpecialForm::VarLocal
            | SpecialForm::VarThreadLocal
            | SpecialForm::VarGlobal
            | SpecialForm::BoundQ => self.eval_var_query(form, args, env),
            SpecialForm::Def => self.eval_def(form, args, env, VarFlags::plain()),
            SpecialForm::DefPrivate => self.eval_def(
                form,
                args,
                env,
                VarFlags {
                    private: true,
                    ..VarFlags::plain()
                },
            ),
            SpecialForm::Defonce => self.eval_def(form, args, env, VarFlags::default()),
            SpecialForm::DefDynamic => self.eval_def(
                form,
                args,
                env,
                VarFlags {
                    dynamic: true,
                    ..VarFlags::plain()
                },
            ),
            SpecialForm::Defn => self.eval_defn(form, args, env, false),
            SpecialForm::DefnPrivate => self.eval_defn(form, args, env, true),
            SpecialForm::Defmacro => self.eval_defn(form, args, env, false),
            SpecialForm::Defmulti => self.eval_defmulti(args, env),
            SpecialForm::Defmethod => self.eval_defmethod(args, env),
            SpecialForm::Deftype => self.eval_deftype(args, env),
            SpecialForm::DeftypeQ => self.eval_deftype_q(args, env),
            SpecialForm::DeftypeOf => self.eval_deftype_of(args, env),
            SpecialForm::DeftypeOr => self.eval_deftype_or(args, env),
            SpecialForm::DeftypeDescribe => self.eval_deftype_describe(args, env),
            SpecialForm::Defprotocol => self.eval_defprotocol(args, env),
            SpecialForm::Extend => self.eval_extend(args, env),
            SpecialForm::ExtendsQ => self.eval_extends_q(args, env),
            SpecialForm::Binding => self.eval_binding(args, env),
            SpecialForm::Set => self.eval_set(args, env),
            SpecialForm::Do => self.eval_body(args, env, tail),
            SpecialForm::If => {
                expect_args(form, args, FnArity::range(2, 3))?;
                if self.eval(&args[0], env, false)?.is_truthy() {
                    self.eval(&args[1], env, tail)
                } else if let Some(otherwise) = args.get(2) {
                    self.eval(otherwise, env, tail)
                } else {
                    Ok(Value::Nil)
                }
            }
            SpecialForm::Let => self.eval_let(args, env, tail),
            SpecialForm::Loop => self.eval_loop(args, env),
            SpecialForm::Recur => self.eval_recur(args, env, tail),
            SpecialForm::Try => {
                let plan = parse_try(args)?;
                self.run_try(&plan, env)
            }
            SpecialForm::TryWith => self.eval_try_with(args, env),
            SpecialForm::Catch | SpecialForm::Finally => Err(EmberError::runtime(format!(
                "{} used outside of try",
                form.name()
            ))),
            SpecialForm::Locking => {
                expect_args(form, args, FnArity::at_least(1))?;
                let target = self.eval(&args[0], env, false)?;
                let _monitor = self.monitors.enter(&target);
                self.eval_body(&args[1..], env, false)
            }
            SpecialForm::Macroexpand => self.eval_macroexpand(args, env),
            SpecialForm::Ns => self.eval_ns(args),
            SpecialForm::NsUnmap => {
                expect_args(form, args, FnArity::exact(2))?;
                let ns = name_arg(&self.eval(&args[0], env, false)?)?;
                let name = name_arg(&self.eval(&args[1], env, false)?)?;
                Ok(Value::Bool(self.registry.unmap(&ns, &name)?))
            }
            SpecialForm::NsRemove => {
                expect_args(form, args, FnArity::exact(1))?;
                let ns = name_arg(&self.eval(&args[0], env, false)?)?;
                Ok(Value::Bool(self.registry.remove(&ns)?))
            }
            SpecialForm::NsList => {
                expect_args(form, args, FnArity::exact(0))?;
                Ok(Value::vector(
                    self.registry
                        .names()
                        .into_iter()
                        .map(|name| Value::Symbol(Symbol::simple(name)))
                        .collect(),
                ))
            }
            SpecialForm::Quote => {
                expect_args(form, args, FnArity::exact(1))?;
                Ok(args[0].clone())
            }
            SpecialForm::Quasiquote => {
                expect_args(form, args, FnArity::exact(1))?;
                let expanded = quasiquote::expand(&args[0], 1)?;
                self.eval(&expanded, env, false)
            }
            SpecialForm::TailPos => {
                expect_args(form, args, FnArity::exact(0))?;
                if tail {
                    Ok(Value::Nil)
                } else {
                    Err(EmberError::runtime("tail-pos: not in tail position"))
                }
            }
            SpecialForm::Inspect => {
                expect_args(form, args, FnArity::exact(1))?;
                let value = self.eval(&args[0], env, false)?;
                self.security
                    .validate("inspect", std::slice::from_ref(&value))?;
                Ok(self.inspect_value(&value))
            }
            SpecialForm::Import => self.eval_import(args, env),
            SpecialForm::Imports => {
                expect_args(form, args, FnArity::exact(0))?;
                let mut map = HashMap::new();
                for (short, full) in self.registry.imports(&self.context_ns(env)) {
                    map.insert(Key::String(short), Value::String(full));
                }
                Ok(Value::Map(map))
            }
            SpecialForm::Dobench => self.eval_repeated(form, args, env, true),
            SpecialForm::Dorun => self.eval_repeated(form, args, env, false),
            SpecialForm::Prof => self.eval_prof(args, env),
        }
    }

    fn eval_gensym(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Gensym, args, FnArity::range(0, 1))?;
        let prefix = match args.first() {
            Some(form) => name_arg(&self.eval(form, env, false)?)?,
            None => "G__".to_string(),
        };
        Ok(Value::Symbol(gensym(&prefix)))
    }

    fn eval_doc(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Doc, args, FnArity::exact(1))?;
        let target = match &args[0] {
            Value::Symbol(_) => args[0].clone(),
            other => self.eval(other, env, false)?,
        };
        let doc_key = kw("doc");
        let var_doc = |var: &Arc<Var>| {
            var.meta()
                .get(&doc_key)
                .cloned()
                .or_else(|| var.value().meta().and_then(|meta| meta.get(&doc_key).cloned()))
                .unwrap_or(Value::Nil)
        };
        match target {
            Value::Symbol(sym) => {
                if sym.ns.is_none() {
                    if let Some(form) = SpecialForm::from_name(&sym.name) {
                        return Ok(Value::string(form.doc()));
                    }
                }
                Ok(self
                    .find_var(&sym, &self.context_ns(env))
                    .map(|var| var_doc(&var))
                    .unwrap_or(Value::Nil))
            }
            Value::Var(var) => Ok(var_doc(&var)),
            other => Ok(other
                .meta()
                .and_then(|meta| meta.get(&doc_key).cloned())
                .unwrap_or(Value::Nil)),
        }
    }

    fn eval_eval(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Eval, args, FnArity::exact(1))?;
        let form = self.eval(&args[0], env, false)?;
        self.security.validate("eval", std::slice::from_ref(&form))?;
        let _restore = self.restore_ns_on_drop();
        self.eval(&form, env, false)
    }

    fn eval_resolve(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Resolve, args, FnArity::exact(1))?;
        match self.eval(&args[0], env, false)? {
            Value::Symbol(sym) => Ok(self
                .find_var(&sym, &self.context_ns(env))
                .map(Value::Var)
                .unwrap_or(Value::Nil)),
            Value::Var(var) => Ok(Value::Var(var)),
            other => Err(EmberError::expected("symbol", &other)),
        }
    }

    fn var_target(&self, form: SpecialForm, args: &[Value], env: &EnvRef) -> Result<VarTarget, EmberError> {
        expect_args(form, args, FnArity::exact(1))?;
        match self.eval(&args[0], env, false)? {
            Value::Var(var) => Ok(VarTarget::Global(var)),
            Value::Symbol(sym) => {
                if sym.ns.is_none() && env.read().unwrap().contains(&sym.name) {
                    return Ok(VarTarget::Local(sym.name.clone()));
                }
                Ok(match self.find_var(&sym, &self.context_ns(env)) {
                    Some(var) => VarTarget::Global(var),
                    None => VarTarget::Unbound(sym.qualified()),
                })
            }
            other => Err(EmberError::expected("symbol", &other)),
        }
    }

    fn eval_var_query(&self, form: SpecialForm, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        let target = self.var_target(form, args, env)?;
        let unbound = |name: &str| {
            EmberError::symbol_not_found(format!("{}: Unable to resolve var: {}", form.name(), name))
        };
        match form {
            SpecialForm::VarGet => match target {
                VarTarget::Local(name) => Ok(env.read().unwrap().get(&name).unwrap_or(Value::Nil)),
                VarTarget::Global(var) => Ok(var.value()),
                VarTarget::Unbound(name) => Err(unbound(&name)),
            },
            SpecialForm::VarName => match target {
                VarTarget::Local(name) => Ok(Value::String(name)),
                VarTarget::Global(var) => Ok(Value::string(var.name())),
                VarTarget::Unbound(name) => Err(unbound(&name)),
            },
            SpecialForm::VarNs => match target {
                VarTarget::Local(_) => Ok(Value::Nil),
                VarTarget::Global(var) => Ok(Value::string(var.ns())),
                VarTarget::Unbound(name) => Err(unbound(&name)),
            },
            SpecialForm::VarLocal => Ok(Value::Bool(matches!(target, VarTarget::Local(_)))),
            SpecialForm::VarThreadLocal => Ok(Value::Bool(matches!(
                target,
                VarTarget::Global(var) if var.is_dynamic() || var.has_thread_binding()
            ))),
            SpecialForm::VarGlobal => Ok(Value::Bool(matches!(target, VarTarget::Global(_)))),
            _ => Ok(Value::Bool(!matches!(target, VarTarget::Unbound(_)))),
        }
    }

    /// Namespace a definition lands in; a qualified name must match it.
    fn def_namespace(&self, sym: &Symbol, env: &EnvRef) -> Result<String, EmberError> {
        let ns = self.context_ns(env);
        match &sym.ns {
            Some(other) if *other != ns => Err(EmberError::runtime(format!(
                "cannot define {} from namespace {}",
                sym.qualified(),
                ns
            ))),
            _ => Ok(ns),
        }
    }

    fn install_var(
        &self,
        ns: &str,
        name: &str,
        value: Value,
        flags: VarFlags,
        meta: MetaMap,
    ) -> Result<Value, EmberError> {
        let value = value.merge_meta(&meta);
        let var = self.registry.intern(ns, name, value, flags, meta)?;
        Ok(Value::Var(var))
    }

    fn eval_def(
        &self,
        form: SpecialForm,
        args: &[Value],
        env: &EnvRef,
        mut flags: VarFlags,
    ) -> Result<Value, EmberError> {
        expect_args(form, args, FnArity::range(1, 3))?;
        let sym = args[0]
            .as_symbol()
            .ok_or_else(|| EmberError::expected("symbol", &args[0]))?;
        let ns = self.def_namespace(sym, env)?;
        let (doc, value_form) = match args.len() {
            3 => match &args[1] {
                Value::String(doc) => (Some(doc.clone()), Some(&args[2])),
                other => return Err(EmberError::expected("doc string", other)),
            },
            2 => (None, Some(&args[1])),
            _ => (None, None),
        };
        let mut meta = sym.meta.clone().unwrap_or_default();
        if let Some(doc) = doc {
            meta.insert(kw("doc"), Value::String(doc));
        }
        flags_from_meta(&meta, &mut flags);
        self.registry.check_definable(&ns, &sym.name)?;
        let value = match value_form {
            Some(value_form) => self.eval(value_form, env, false)?,
            None => Value::Nil,
        };
        self.install_var(&ns, &sym.name, value, flags, meta)
    }

    fn build_named_fn(
        &self,
        name: &str,
        rest: &[Value],
        env: &EnvRef,
        ns: &str,
    ) -> Result<Lambda, EmberError> {
        let mut fn_args = Vec::with_capacity(rest.len() + 1);
        fn_args.push(Value::Symbol(Symbol::simple(name)));
        fn_args.extend_from_slice(rest);
        build_fn(&fn_args, env, ns)
    }

    /// `defn`, `defn-` and `defmacro`.
    fn eval_defn(
        &self,
        form: SpecialForm,
        args: &[Value],
        env: &EnvRef,
        private: bool,
    ) -> Result<Value, EmberError> {
        expect_args(form, args, FnArity::at_least(2))?;
        let sym = args[0]
            .as_symbol()
            .ok_or_else(|| EmberError::expected("symbol", &args[0]))?;
        let ns = self.def_namespace(sym, env)?;
        let mut meta = sym.meta.clone().unwrap_or_default();
        let mut idx = 1;
        if let Some(Value::String(doc)) = args.get(idx) {
            if args.len() > idx + 1 {
                meta.insert(kw("doc"), Value::String(doc.clone()));
                idx += 1;
            }
        }
        if let Some(Value::Map(attrs)) = args.get(idx) {
            if args.len() > idx + 1 {
                for (k, v) in attrs.iter() {
                    meta.insert(k.clone(), v.clone());
                }
                idx += 1;
            }
        }
        let mut flags = VarFlags::plain();
        flags.private = private;
        flags_from_meta(&meta, &mut flags);
        self.registry.check_definable(&ns, &sym.name)?;
        let lambda = self.build_named_fn(&sym.name, &args[idx..], env, &ns)?;
        meta.insert(kw("arglists"), lambda.arglists());
        let value = if form == SpecialForm::Defmacro {
            Value::Macro(Arc::new(lambda))
        } else {
            Value::Lambda(Arc::new(lambda))
        };
        self.install_var(&ns, &sym.name, value, flags, meta)
    }

    fn eval_defmulti(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Defmulti, args, FnArity::range(2, 3))?;
        let sym = args[0]
            .as_symbol()
            .ok_or_else(|| EmberError::expected("symbol", &args[0]))?;
        let ns = self.def_namespace(sym, env)?;
        if let Some(var) = self.registry.lookup(&ns, &sym.name) {
            if matches!(var.root_value(), Value::MultiFn(_)) {
                return Ok(Value::Var(var));
            }
        }
        let mut meta = sym.meta.clone().unwrap_or_default();
        if args.len() == 3 {
            match &args[1] {
                Value::String(doc) => {
                    meta.insert(kw("doc"), Value::String(doc.clone()));
                }
                other => return Err(EmberError::expected("doc string", other)),
            }
        }
        self.registry.check_definable(&ns, &sym.name)?;
        let dispatch = self.eval(&args[args.len() - 1], env, false)?;
        let mm = MultiMethod::new(qualify(&ns, &sym.name), dispatch)?;
        self.install_var(&ns, &sym.name, Value::MultiFn(Arc::new(mm)), VarFlags::plain(), meta)
    }

    fn eval_defmethod(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Defmethod, args, FnArity::at_least(3))?;
        let sym = args[0]
            .as_symbol()
            .ok_or_else(|| EmberError::expected("symbol", &args[0]))?;
        let Value::MultiFn(mm) = self.resolve_symbol(sym, env)? else {
            return Err(EmberError::type_mismatch(format!(
                "defmethod: {} is not a multimethod",
                sym.qualified()
            )));
        };
        let dispatch_value = self.eval(&args[1], env, false)?;
        let lambda = self.build_named_fn(&sym.name, &args[2..], env, &self.context_ns(env))?;
        mm.add_method(dispatch_value, Value::Lambda(Arc::new(lambda)));
        Ok(Value::MultiFn(mm))
    }

    /// `:Name`, `Name` or `:ns/Name` in the defining namespace.
    fn type_name_arg(&self, form: &Value, env: &EnvRef) -> Result<(String, String), EmberError> {
        let text = match form {
            Value::Keyword(k) => k.clone(),
            Value::Symbol(sym) => sym.qualified(),
            other => return Err(EmberError::expected("type name", other)),
        };
        let ns = self.context_ns(env);
        match split_qualified(&text) {
            (Some(other), _) if other != ns => Err(EmberError::runtime(format!(
                "cannot define type {} from namespace {}",
                text, ns
            ))),
            (_, simple) => Ok((ns, simple.to_string())),
        }
    }

    fn eval_validator(&self, form: Option<&Value>, env: &EnvRef) -> Result<Option<Value>, EmberError> {
        let Some(form) = form else {
            return Ok(None);
        };
        let validator = self.eval(form, env, false)?;
        if !validator.is_callable() {
            return Err(EmberError::expected("validator function", &validator));
        }
        Ok(Some(validator))
    }

    /// Register the type and install `Name`, `Name.` and `Name?`.
    fn install_type(&self, def: CustomTypeDef) -> Result<Value, EmberError> {
        let def = Arc::new(def);
        let ns = def.ns.clone();
        let ctor_name = format!("{}.", def.name);
        let pred_name = format!("{}?", def.name);
        for name in [&def.name, &ctor_name, &pred_name] {
            self.registry.check_definable(&ns, name)?;
        }
        self.registry.register_type(def.clone())?;
        let qualified = def.qualified_name();

        let registry = Arc::downgrade(&self.registry);
        let ctor_def = def.clone();
        let ctor = Value::native_fn(
            FnArity::at_least(0),
            qualify(&ns, &ctor_name),
            move |args| {
                let registry = registry
                    .upgrade()
                    .ok_or_else(|| EmberError::runtime("runtime has been shut down"))?;
                construct(&registry, &ctor_def, args)
            },
        );
        let registry = Arc::downgrade(&self.registry);
        let declared = qualified.clone();
        let pred = Value::native_fn(FnArity::exact(1), qualify(&ns, &pred_name), move |args| {
            let registry = registry
                .upgrade()
                .ok_or_else(|| EmberError::runtime("runtime has been shut down"))?;
            Ok(Value::Bool(conforms(&registry, &args[0], &declared)))
        });

        let mut ctor_meta = MetaMap::new();
        ctor_meta.insert(kw("doc"), Value::String(format!("Constructs a {}.", qualified)));
        let mut pred_meta = MetaMap::new();
        pred_meta.insert(kw("doc"), Value::String(format!("True for values of {}.", qualified)));
        self.registry
            .intern(&ns, &def.name, Value::TypeDef(def.clone()), VarFlags::plain(), MetaMap::new())?;
        self.registry
            .intern(&ns, &ctor_name, ctor, VarFlags::plain(), ctor_meta)?;
        self.registry
            .intern(&ns, &pred_name, pred, VarFlags::plain(), pred_meta)?;
        Ok(Value::TypeDef(def))
    }

    fn eval_deftype(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Deftype, args, FnArity::range(2, 3))?;
        let (ns, name) = self.type_name_arg(&args[0], env)?;
        let Value::Vector(spec) = &args[1] else {
            return Err(EmberError::expected("field vector", &args[1]));
        };
        let fields = parse_fields(&self.registry, &ns, spec)?;
        let validator = self.eval_validator(args.get(2), env)?;
        self.install_type(CustomTypeDef::new(
            &ns,
            &name,
            CustomKind::Record { fields },
            validator,
        ))
    }

    fn eval_deftype_of(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::DeftypeOf, args, FnArity::range(2, 3))?;
        let (ns, name) = self.type_name_arg(&args[0], env)?;
        let base = resolve_type_name(&self.registry, &ns, &args[1])?;
        let validator = self.eval_validator(args.get(2), env)?;
        self.install_type(CustomTypeDef::new(
            &ns,
            &name,
            CustomKind::Wrapper { base },
            validator,
        ))
    }

    /// A trailing function among the alternatives is the validator.
    fn eval_deftype_or(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::DeftypeOr, args, FnArity::at_least(2))?;
        let (ns, name) = self.type_name_arg(&args[0], env)?;
        let mut values = Vec::with_capacity(args.len() - 1);
        for form in &args[1..] {
            values.push(self.eval(form, env, false)?);
        }
        let validator = match values.last() {
            Some(Value::Func(_) | Value::Lambda(_)) => values.pop(),
            _ => None,
        };
        if values.is_empty() {
            return Err(EmberError::runtime(format!(
                "deftype-or {} needs at least one alternative",
                name
            )));
        }
        let alternatives = parse_alternatives(&self.registry, &ns, &values);
        self.install_type(CustomTypeDef::new(
            &ns,
            &name,
            CustomKind::Choice { alternatives },
            validator,
        ))
    }

    fn eval_deftype_q(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::DeftypeQ, args, FnArity::exact(1))?;
        let found = match self.eval(&args[0], env, false)? {
            Value::TypeDef(_) => true,
            Value::Keyword(k) => lookup_type_name(&self.registry, &self.context_ns(env), &k)
                .is_some_and(|qualified| match split_qualified(&qualified) {
                    (Some(ns), simple) => self.registry.lookup_type(ns, simple).is_some(),
                    (None, _) => false,
                }),
            _ => false,
        };
        Ok(Value::Bool(found))
    }

    fn eval_deftype_describe(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::DeftypeDescribe, args, FnArity::exact(1))?;
        let designator = self.eval(&args[0], env, false)?;
        if let Value::TypeDef(def) = &designator {
            return Ok(def.describe());
        }
        let qualified = resolve_type_name(&self.registry, &self.context_ns(env), &designator)?;
        if let (Some(ns), simple) = split_qualified(&qualified) {
            if let Some(def) = self.registry.lookup_type(ns, simple) {
                return Ok(def.describe());
            }
        }
        let chain = type_chain(&self.registry, &qualified);
        let mut map = HashMap::new();
        map.insert(kw("name"), Value::keyword(qualified.clone()));
        map.insert(kw("kind"), Value::keyword("builtin"));
        map.insert(
            kw("supertype"),
            chain.get(1).cloned().map(Value::keyword).unwrap_or(Value::Nil),
        );
        Ok(Value::Map(map))
    }

    fn eval_defprotocol(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Defprotocol, args, FnArity::at_least(1))?;
        let name = args[0]
            .as_simple_symbol()
            .ok_or_else(|| EmberError::expected("protocol name", &args[0]))?;
        let ns = self.context_ns(env);
        let mut doc = None;
        let mut methods = Vec::new();
        for form in &args[1..] {
            match form {
                Value::String(s) => doc = Some(s.clone()),
                Value::List(items) => {
                    let items: Vec<Value> = items.iter().cloned().collect();
                    methods.push(self.parse_method_spec(&items, env, &ns)?);
                }
                other => return Err(EmberError::expected("protocol function signature", other)),
            }
        }
        let protocol = install_protocol(&self.registry, &ns, name, methods, doc)?;
        Ok(Value::Protocol(protocol))
    }

    /// `(f [x] [x y] "doc"?)` or `(g ([x] default-body...))`.
    fn parse_method_spec(&self, items: &[Value], env: &EnvRef, ns: &str) -> Result<MethodSpec, EmberError> {
        let name = items
            .first()
            .and_then(Value::as_simple_symbol)
            .ok_or_else(|| EmberError::runtime("defprotocol: function signature needs a name"))?;
        let mut arities = Vec::new();
        let mut default_clauses = Vec::new();
        let mut doc = None;
        for item in &items[1..] {
            match item {
                Value::Vector(_) => {
                    for clause in parse_clauses(std::slice::from_ref(item))? {
                        arities.push(clause.arity());
                    }
                }
                Value::List(_) => default_clauses.push(item.clone()),
                Value::String(s) => doc = Some(s.clone()),
                other => return Err(EmberError::expected("parameter vector", other)),
            }
        }
        let default = if default_clauses.is_empty() {
            None
        } else {
            let lambda = self.build_named_fn(name, &default_clauses, env, ns)?;
            arities.extend(lambda.clauses.iter().map(FnClause::arity));
            Some(Value::Lambda(Arc::new(lambda)))
        };
        if arities.is_empty() {
            return Err(EmberError::runtime(format!(
                "defprotocol: {} needs at least one parameter vector",
                name
            )));
        }
        Ok(MethodSpec {
            name: name.to_string(),
            arities,
            default,
            doc,
        })
    }

    fn eval_extend(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Extend, args, FnArity::at_least(1))?;
        let ctx = self.context_ns(env);
        let designator = self.eval(&args[0], env, false)?;
        let type_name = resolve_type_name(&self.registry, &ctx, &designator)?;
        let mut current: Option<(Arc<Protocol>, Vec<(String, Value)>)> = None;
        for form in &args[1..] {
            match form {
                Value::List(items) => {
                    let Some((_, impls)) = current.as_mut() else {
                        return Err(EmberError::runtime(
                            "extend: method implementation before any protocol",
                        ));
                    };
                    let items: Vec<Value> = items.iter().cloned().collect();
                    let method = items
                        .first()
                        .and_then(Value::as_simple_symbol)
                        .ok_or_else(|| EmberError::runtime("extend: method needs a name"))?;
                    let lambda = self.build_named_fn(method, &items[1..], env, &ctx)?;
                    impls.push((method.to_string(), Value::Lambda(Arc::new(lambda))));
                }
                other => {
                    let Value::Protocol(protocol) = self.eval(other, env, false)? else {
                        return Err(EmberError::type_mismatch(format!(
                            "extend: {} is not a protocol",
                            other
                        )));
                    };
                    if let Some((previous, impls)) = current.take() {
                        extend_type(&self.registry, &type_name, &previous, impls)?;
                    }
                    current = Some((protocol, Vec::new()));
                }
            }
        }
        if let Some((protocol, impls)) = current {
            extend_type(&self.registry, &type_name, &protocol, impls)?;
        }
        Ok(Value::Nil)
    }

    fn eval_extends_q(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::ExtendsQ, args, FnArity::exact(2))?;
        let designator = self.eval(&args[0], env, false)?;
        let Value::Protocol(protocol) = self.eval(&args[1], env, false)? else {
            return Err(EmberError::type_mismatch("extends?: expected a protocol"));
        };
        let registered = resolve_type_name(&self.registry, &self.context_ns(env), &designator)
            .map(|type_name| protocol.is_registered(&self.registry, &type_name))
            .unwrap_or(false);
        Ok(Value::Bool(registered))
    }

    fn eval_binding(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Binding, args, FnArity::at_least(1))?;
        let ctx = self.context_ns(env);
        let mut bindings = Vec::new();
        for (target, value_form) in binding_pairs(SpecialForm::Binding, &args[0])? {
            let sym = target
                .as_symbol()
                .ok_or_else(|| EmberError::expected("symbol", &target))?;
            let var = self.find_var(sym, &ctx).ok_or_else(|| {
                EmberError::symbol_not_found(format!(
                    "binding: Unable to resolve var: {}",
                    sym.qualified()
                ))
            })?;
            let value = self.eval(&value_form, env, false)?;
            bindings.push((var.qualified_name().to_string(), value));
        }
        let _guard = dynamic_vars::push_bindings(&bindings);
        self.eval_body(&args[1..], env, false)
    }

    fn eval_set(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Set, args, FnArity::exact(2))?;
        let sym = args[0]
            .as_symbol()
            .ok_or_else(|| EmberError::expected("symbol", &args[0]))?;
        if sym.ns.is_none() && env.read().unwrap().contains(&sym.name) {
            return Err(EmberError::runtime(format!(
                "set!: cannot assign local binding {}",
                sym.name
            )));
        }
        let var = self
            .find_var(sym, &self.context_ns(env))
            .ok_or_else(|| {
                EmberError::symbol_not_found(format!(
                    "set!: Unable to resolve var: {}",
                    sym.qualified()
                ))
            })?;
        let value = self.eval(&args[1], env, false)?;
        if dynamic_vars::replace_top(var.qualified_name(), value.clone()) {
            return Ok(value);
        }
        self.registry.check_mutable(var.ns())?;
        if !var.is_overwritable() {
            return Err(EmberError::duplicate(format!(
                "{} cannot be redefined",
                var.qualified_name()
            )));
        }
        var.set_root(value.clone());
        Ok(value)
    }

    fn eval_let(&self, args: &[Value], env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Let, args, FnArity::at_least(1))?;
        let scope = child_of(env);
        for (pattern, value_form) in binding_pairs(SpecialForm::Let, &args[0])? {
            let value = self.eval(&value_form, &scope, false)?;
            self.bind_into(&pattern, value, &scope)?;
        }
        self.eval_body(&args[1..], &scope, tail)
    }

    fn eval_loop(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Loop, args, FnArity::at_least(1))?;
        let pairs = binding_pairs(SpecialForm::Loop, &args[0])?;
        let body = &args[1..];
        let target = next_recur_target();
        let mut frame = loop_frame(env, target);
        for (pattern, init) in &pairs {
            let value = self.eval(init, &frame, false)?;
            self.bind_into(pattern, value, &frame)?;
        }
        loop {
            check_for_interrupt()?;
            match self.eval_body(body, &frame, true) {
                Err(EmberError::RecurSignal { target: t, values }) if t == target => {
                    if values.len() != pairs.len() {
                        return Err(EmberError::arity(format!(
                            "recur expects {} arguments, got {}",
                            pairs.len(),
                            values.len()
                        )));
                    }
                    frame = loop_frame(env, target);
                    for ((pattern, _), value) in pairs.iter().zip(values) {
                        self.bind_into(pattern, value, &frame)?;
                    }
                }
                other => return other,
            }
        }
    }

    fn eval_recur(&self, args: &[Value], env: &EnvRef, tail: bool) -> Result<Value, EmberError> {
        if !tail {
            return Err(EmberError::runtime("recur: can only be used in tail position"));
        }
        let target = env
            .read()
            .unwrap()
            .recur_target()
            .ok_or_else(|| EmberError::runtime("recur: no enclosing loop or fn"))?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env, false)?);
        }
        Err(EmberError::RecurSignal { target, values })
    }

    /// Body, then the first matching catch, then finally (exactly once).
    fn run_try(&self, plan: &TryPlan, env: &EnvRef) -> Result<Value, EmberError> {
        let outcome = match self.eval_body(&plan.body, &child_of(env), false) {
            Err(err) if !err.is_recur_signal() => self.handle_catch(&plan.catches, err, env),
            other => other,
        };
        if let Some(finally) = &plan.finally {
            self.eval_body(&finally.body, &child_of(env), false)?;
        }
        outcome
    }

    fn handle_catch(&self, catches: &[CatchBlock], err: EmberError, env: &EnvRef) -> Result<Value, EmberError> {
        if catches.is_empty() {
            return Err(err);
        }
        let condition = err.to_condition();
        let mut eval_selector = |form: &Value| self.eval(form, env, false);
        let mut call = |f: &Value, arg: Value| self.apply(f, vec![arg]);
        for catch in catches {
            let selector = resolve_selector(&catch.selector, &mut eval_selector)?;
            if selector.matches(&condition, &mut call)? {
                let scope = child_of(env);
                scope
                    .write()
                    .unwrap()
                    .set(&catch.binding, Value::Condition(condition.clone()));
                return self.eval_body(&catch.body, &scope, false);
            }
        }
        Err(err)
    }

    fn eval_try_with(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::TryWith, args, FnArity::at_least(1))?;
        let pairs = binding_pairs(SpecialForm::TryWith, &args[0])?;
        let plan = parse_try(&args[1..])?;
        let scope = child_of(env);
        let mut acquired = Vec::with_capacity(pairs.len());
        for (name, init) in &pairs {
            let name = name
                .as_simple_symbol()
                .ok_or_else(|| EmberError::expected("resource name", name))?;
            match self.eval(init, &scope, false) {
                Ok(resource) => {
                    scope.write().unwrap().set(name, resource.clone());
                    acquired.push(resource);
                }
                Err(err) => {
                    let _ = self.close_resources(&acquired, true);
                    return Err(err);
                }
            }
        }
        let outcome = self.run_try(&plan, &scope);
        let closed = self.close_resources(&acquired, outcome.is_err());
        match (outcome, closed) {
            (Ok(_), Err(err)) => Err(err),
            (outcome, _) => outcome,
        }
    }

    /// Close in reverse acquisition order. Every resource is attempted; the
    /// first failure is returned.
    fn close_resources(&self, resources: &[Value], body_failed: bool) -> Result<(), EmberError> {
        let mut first_err = None;
        for resource in resources.iter().rev() {
            if matches!(resource, Value::Nil) {
                continue;
            }
            if let Err(err) = self.close_resource(resource) {
                if body_failed || first_err.is_some() {
                    log::warn!("suppressed failure closing {}: {}", resource, err);
                }
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close_resource(&self, resource: &Value) -> Result<(), EmberError> {
        let close = self
            .registry
            .lookup(CORE_NS, "close")
            .map(|var| var.value())
            .ok_or_else(|| EmberError::runtime("core/close is not defined"))?;
        self.apply(&close, vec![resource.clone()])?;
        Ok(())
    }

    fn eval_macroexpand(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Macroexpand, args, FnArity::exact(1))?;
        let mut form = self.eval(&args[0], env, false)?;
        for _ in 0..self.options.macroexpand_limit {
            let Value::List(items) = &form else {
                return Ok(form);
            };
            let Some(Value::Symbol(head)) = items.front() else {
                return Ok(form);
            };
            let Some(mac) = self.macro_for(head, env) else {
                return Ok(form);
            };
            let macro_args: Vec<Value> = items.iter().skip(1).cloned().collect();
            form = self.apply_lambda(&mac, macro_args)?;
        }
        Err(EmberError::runtime(format!(
            "macroexpand: gave up after {} expansions",
            self.options.macroexpand_limit
        )))
    }

    fn eval_ns(&self, args: &[Value]) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Ns, args, FnArity::range(1, 2))?;
        let name = name_arg(&args[0])?;
        if self.registry.exists(&name) {
            self.registry.check_mutable(&name)?;
        }
        self.set_current_ns(&name);
        Ok(Value::Nil)
    }

    fn eval_import(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Import, args, FnArity::at_least(1))?;
        let names = args.iter().map(name_arg).collect::<Result<Vec<_>, _>>()?;
        self.security.validate("import", args)?;
        let ns = self.context_ns(env);
        let mut shorts = Vec::with_capacity(names.len());
        for name in &names {
            shorts.push(Value::Symbol(Symbol::simple(self.registry.add_import(&ns, name)?)));
        }
        Ok(Value::vector(shorts))
    }

    /// `dobench` collects per-run nanoseconds; `dorun` discards them.
    fn eval_repeated(
        &self,
        form: SpecialForm,
        args: &[Value],
        env: &EnvRef,
        collect: bool,
    ) -> Result<Value, EmberError> {
        expect_args(form, args, FnArity::exact(2))?;
        let count = match self.eval(&args[0], env, false)? {
            Value::Int(n) if n >= 0 => n as usize,
            other => {
                return Err(EmberError::type_mismatch(format!(
                    "{} expects a non-negative count, got {}",
                    form.name(),
                    other
                )))
            }
        };
        let mut timings = Vector::new();
        for _ in 0..count {
            check_for_interrupt()?;
            let start = Instant::now();
            self.eval(&args[1], env, false)?;
            if collect {
                let nanos = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
                timings.push_back(Value::Int(nanos));
            }
        }
        Ok(if collect {
            Value::Vector(timings)
        } else {
            Value::Nil
        })
    }

    fn eval_prof(&self, args: &[Value], env: &EnvRef) -> Result<Value, EmberError> {
        expect_args(SpecialForm::Prof, args, FnArity::exact(1))?;
        match self.eval(&args[0], env, false)? {
            Value::Keyword(k) => match k.as_str() {
                "on" => {
                    profiler::set_enabled(true);
                    Ok(Value::Nil)
                }
                "off" => {
                    profiler::set_enabled(false);
                    Ok(Value::Nil)
                }
                "clear" => {
                    profiler::reset();
                    Ok(Value::Nil)
                }
                "data" => Ok(profiler::data()),
                other => Err(EmberError::runtime(format!(
                    "prof: unknown command :{}",
                    other
                ))),
            },
            other => Err(EmberError::expected("keyword", &other)),
        }
    }

    fn inspect_value(&self, value: &Value) -> Value {
        let mut map = HashMap::new();
        map.insert(kw("type"), Value::keyword(runtime_type(value)));
        map.insert(kw("value"), value.clone());
        match value {
            Value::Lambda(lambda) | Value::Macro(lambda) => {
                map.insert(
                    kw("name"),
                    lambda.name.clone().map(Value::String).unwrap_or(Value::Nil),
                );
                map.insert(kw("ns"), Value::String(lambda.ns.clone()));
                map.insert(kw("arglists"), lambda.arglists());
            }
            Value::Func(native) => {
                map.insert(kw("name"), Value::string(native.name()));
                map.insert(kw("arity"), Value::String(native.arity().describe()));
            }
            Value::MultiFn(mm) => {
                map.insert(kw("name"), Value::String(mm.name.clone()));
                map.insert(kw("dispatch-values"), Value::vector(mm.dispatch_values()));
            }
            Value::Protocol(protocol) => {
                map.insert(kw("name"), Value::String(protocol.name.clone()));
                map.insert(
                    kw("methods"),
                    Value::vector(
                        protocol
                            .methods
                            .iter()
                            .map(|m| Value::String(m.name.clone()))
                            .collect(),
                    ),
                );
                map.insert(
                    kw("types"),
                    Value::vector(protocol.types().into_iter().map(Value::keyword).collect()),
                );
            }
            Value::ProtocolFn(pf) => {
                map.insert(kw("protocol"), Value::String(pf.protocol.name.clone()));
                map.insert(
                    kw("types"),
                    Value::vector(pf.implemented_types().into_iter().map(Value::keyword).collect()),
                );
            }
            Value::TypeDef(def) => {
                map.insert(kw("definition"), def.describe());
            }
            Value::Custom(custom) => match &custom.data {
                CustomData::Record(fields) => {
                    let mut entries = HashMap::new();
                    for (name, field) in fields {
                        entries.insert(Key::keyword(name.clone()), field.clone());
                    }
                    map.insert(kw("fields"), Value::Map(entries));
                }
                CustomData::Wrapped(inner) => {
                    map.insert(kw("wrapped"), inner.clone());
                }
            },
            Value::Var(var) => {
                map.insert(kw("ns"), Value::string(var.ns()));
                map.insert(kw("name"), Value::string(var.name()));
                map.insert(kw("dynamic"), Value::Bool(var.is_dynamic()));
                map.insert(kw("private"), Value::Bool(var.is_private()));
                map.insert(kw("overwritable"), Value::Bool(var.is_overwritable()));
            }
            Value::Condition(cond) => {
                map.insert(kw("kind"), Value::keyword(cond.kind.name()));
                map.insert(kw("message"), Value::String(cond.message.clone()));
                map.insert(kw("data"), cond.value.clone().unwrap_or(Value::Nil));
                map.insert(
                    kw("cause"),
                    cond.cause
                        .clone()
                        .map(Value::Condition)
                        .unwrap_or(Value::Nil),
                );
            }
            Value::List(items) | Value::Vector(items) => {
                map.insert(kw("count"), Value::Int(items.len() as i64));
            }
            Value::Map(entries) => {
                map.insert(kw("count"), Value::Int(entries.len() as i64));
            }
            Value::Set(items) => {
                map.insert(kw("count"), Value::Int(items.len() as i64));
            }
            Value::String(s) => {
                map.insert(kw("count"), Value::Int(s.chars().count() as i64));
            }
            _ => {}
        }
        Value::Map(map)
    }
}
