/// Forms evaluated by bespoke rules instead of "evaluate arguments, then
/// apply". The set is closed; `Evaluator::eval_special` matches on it
/// exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Gensym,
    Doc,
    Modules,
    Fn,
    Eval,
    Resolve,
    VarGet,
    VarName,
    VarNs,
    VarLocal,
    VarThreadLocal,
    VarGlobal,
    Def,
    DefPrivate,
    Defn,
    DefnPrivate,
    Defonce,
    Defmulti,
    Defmethod,
    Deftype,
    DeftypeQ,
    DeftypeOf,
    DeftypeOr,
    DeftypeDescribe,
    Defprotocol,
    Extend,
    ExtendsQ,
    DefDynamic,
    Binding,
    BoundQ,
    Set,
    Do,
    If,
    Let,
    Loop,
    Recur,
    Try,
    TryWith,
    Catch,
    Finally,
    Locking,
    Defmacro,
    Macroexpand,
    Ns,
    NsUnmap,
    NsRemove,
    NsList,
    Quote,
    Quasiquote,
    TailPos,
    Inspect,
    Import,
    Imports,
    Dobench,
    Dorun,
    Prof,
}

impl SpecialForm {
    pub const ALL: &'static [SpecialForm] = &[
        SpecialForm::Gensym,
        SpecialForm::Doc,
        SpecialForm::Modules,
        SpecialForm::Fn,
        SpecialForm::Eval,
        SpecialForm::Resolve,
        SpecialForm::VarGet,
        SpecialForm::VarName,
        SpecialForm::VarNs,
        SpecialForm::VarLocal,
        SpecialForm::VarThreadLocal,
        SpecialForm::VarGlobal,
        SpecialForm::Def,
        SpecialForm::DefPrivate,
        SpecialForm::Defn,
        SpecialForm::DefnPrivate,
        SpecialForm::Defonce,
        SpecialForm::Defmulti,
        SpecialForm::Defmethod,
        SpecialForm::Deftype,
        SpecialForm::DeftypeQ,
        SpecialForm::DeftypeOf,
        SpecialForm::DeftypeOr,
        SpecialForm::DeftypeDescribe,
        SpecialForm::Defprotocol,
        SpecialForm::Extend,
        SpecialForm::ExtendsQ,
        SpecialForm::DefDynamic,
        SpecialForm::Binding,
        SpecialForm::BoundQ,
        SpecialForm::Set,
        SpecialForm::Do,
        SpecialForm::If,
        SpecialForm::Let,
        SpecialForm::Loop,
        SpecialForm::Recur,
        SpecialForm::Try,
        SpecialForm::TryWith,
        SpecialForm::Catch,
        SpecialForm::Finally,
        SpecialForm::Locking,
        SpecialForm::Defmacro,
        SpecialForm::Macroexpand,
        SpecialForm::Ns,
        SpecialForm::NsUnmap,
        SpecialForm::NsRemove,
        SpecialForm::NsList,
        SpecialForm::Quote,
        SpecialForm::Quasiquote,
        SpecialForm::TailPos,
        SpecialForm::Inspect,
        SpecialForm::Import,
        SpecialForm::Imports,
        SpecialForm::Dobench,
        SpecialForm::Dorun,
        SpecialForm::Prof,
    ];

    pub fn name(self) -> &'static str {
        use SpecialForm::*;
        match self {
            Gensym => "gensym",
            Doc => "doc",
            Modules => "modules",
            Fn => "fn",
            Eval => "eval",
            Resolve => "resolve",
            VarGet => "var-get",
            VarName => "var-name",
            VarNs => "var-ns",
            VarLocal => "var-local?",
            VarThreadLocal => "var-thread-local?",
            VarGlobal => "var-global?",
            Def => "def",
            DefPrivate => "def-",
            Defn => "defn",
            DefnPrivate => "defn-",
            Defonce => "defonce",
            Defmulti => "defmulti",
            Defmethod => "defmethod",
            Deftype => "deftype",
            DeftypeQ => "deftype?",
            DeftypeOf => "deftype-of",
            DeftypeOr => "deftype-or",
            DeftypeDescribe => "deftype-describe",
            Defprotocol => "defprotocol",
            Extend => "extend",
            ExtendsQ => "extends?",
            DefDynamic => "def-dynamic",
            Binding => "binding",
            BoundQ => "bound?",
            Set => "set!",
            Do => "do",
            If => "if",
            Let => "let",
            Loop => "loop",
            Recur => "recur",
            Try => "try",
            TryWith => "try-with",
            Catch => "catch",
            Finally => "finally",
            Locking => "locking",
            Defmacro => "defmacro",
            Macroexpand => "macroexpand",
            Ns => "ns",
            NsUnmap => "ns-unmap",
            NsRemove => "ns-remove",
            NsList => "ns-list",
            Quote => "quote",
            Quasiquote => "quasiquote",
            TailPos => "tail-pos",
            Inspect => "inspect",
            Import => "import",
            Imports => "imports",
            Dobench => "dobench",
            Dorun => "dorun",
            Prof => "prof",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|form| form.name() == name)
    }

    pub fn doc(self) -> &'static str {
        use SpecialForm::*;
        match self {
            Gensym => "(gensym) / (gensym prefix): returns a fresh unique symbol.",
            Doc => "(doc name): doc string of a special form or var, or nil.",
            Modules => "(modules): keywords naming the loaded modules.",
            Fn => "(fn name? [params] {:pre [...]}? body...) or (fn name? ([params] body...)+): builds a closure.",
            Eval => "(eval form): evaluates data as code; the current namespace is restored afterwards.",
            Resolve => "(resolve 'sym): the var a symbol names, or nil.",
            VarGet => "(var-get 'sym): current value of the var a symbol names.",
            VarName => "(var-name 'sym): simple name of the resolved var.",
            VarNs => "(var-ns 'sym): namespace of the resolved var.",
            VarLocal => "(var-local? 'sym): true when sym is bound in a local frame.",
            VarThreadLocal => "(var-thread-local? 'sym): true when sym names a dynamic var or one rebound on this thread.",
            VarGlobal => "(var-global? 'sym): true when sym names a var in a namespace.",
            Def => "(def name value): installs a var in the current namespace.",
            DefPrivate => "(def- name value): installs a private var.",
            Defn => "(defn name doc? attr-map? [params] body...): defines a function.",
            DefnPrivate => "(defn- name ...): defines a private function.",
            Defonce => "(defonce name value): installs a var that cannot be redefined.",
            Defmulti => "(defmulti name dispatch): defines a multimethod dispatching on (dispatch args...).",
            Defmethod => "(defmethod name dispatch-value [params] body...): adds a multimethod implementation.",
            Deftype => "(deftype :Name [field :type ...] validator?): defines a record type.",
            DeftypeQ => "(deftype? :Name): true when a custom type of that name exists.",
            DeftypeOf => "(deftype-of :Name :base validator?): defines a wrapper type over a base type.",
            DeftypeOr => "(deftype-or :Name alternative...): defines a choice type over literals and types.",
            DeftypeDescribe => "(deftype-describe :Name): map describing a custom type.",
            Defprotocol => "(defprotocol Name (fname [params]...) ...): defines a protocol.",
            Extend => "(extend :type Protocol (fname [params] body...) ...): implements protocols for a type.",
            ExtendsQ => "(extends? :type Protocol): true when the type implements the protocol.",
            DefDynamic => "(def-dynamic name value): installs a dynamic var.",
            Binding => "(binding [var value ...] body...): rebinds global vars for this thread.",
            BoundQ => "(bound? 'sym): true when the symbol resolves.",
            Set => "(set! name value): assigns a global or the innermost dynamic binding.",
            Do => "(do forms...): evaluates forms in order, returning the last.",
            If => "(if test then else?): conditional.",
            Let => "(let [pattern value ...] body...): local bindings.",
            Loop => "(loop [pattern value ...] body...): local bindings and a recur target.",
            Recur => "(recur args...): rebinds the nearest loop or fn in tail position.",
            Try => "(try body... (catch selector e body...)* (finally body...)?): structured exception handling.",
            TryWith => "(try-with [r resource ...] body... catch* finally?): try that closes resources in reverse order.",
            Catch => "(catch selector name body...): only valid inside try.",
            Finally => "(finally body...): only valid inside try.",
            Locking => "(locking target body...): evaluates body holding the target's monitor.",
            Defmacro => "(defmacro name [params] body...): defines a macro.",
            Macroexpand => "(macroexpand form): expands a macro call until its head is not a macro.",
            Ns => "(ns name): switches to (and creates) a namespace.",
            NsUnmap => "(ns-unmap ns name): removes a var from a namespace.",
            NsRemove => "(ns-remove ns): removes a namespace.",
            NsList => "(ns-list): names of all namespaces.",
            Quote => "(quote form): returns form unevaluated.",
            Quasiquote => "(quasiquote form): template with unquote and unquote-splicing.",
            TailPos => "(tail-pos): fails unless evaluated in tail position.",
            Inspect => "(inspect value): map describing a value.",
            Import => "(import name ...): records host type names in the current namespace.",
            Imports => "(imports): host types imported into the current namespace.",
            Dobench => "(dobench n expr): evaluates expr n times, returning elapsed nanoseconds per run.",
            Dorun => "(dorun n expr): evaluates expr n times for effect.",
            Prof => "(prof :on|:off|:clear|:data): controls the call profiler.",
        }
    }
}

pub fn names() -> Vec<&'static str> {
    SpecialForm::ALL.iter().map(|form| form.name()).collect()
}

pub fn is_special_form(name: &str) -> bool {
    SpecialForm::from_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_closed_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for form in SpecialForm::ALL {
            assert!(seen.insert(form.name()));
            assert_eq!(SpecialForm::from_name(form.name()), Some(*form));
            assert!(!form.doc().is_empty());
        }
        assert_eq!(names().len(), 56);
        assert!(!is_special_form("map"));
    }
}
