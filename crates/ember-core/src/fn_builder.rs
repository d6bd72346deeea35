use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ast::{FnArity, Key, MetaMap, Value};
use crate::env::EnvRef;
use crate::error::EmberError;

static NEXT_FN_ID: AtomicUsize = AtomicUsize::new(1);

/// One arity of a function: parameter patterns, optional rest pattern,
/// precondition forms and body.
#[derive(Clone, Debug)]
pub struct FnClause {
    pub params: Vec<Value>,
    pub rest: Option<Value>,
    pub pre: Vec<Value>,
    pub body: Vec<Value>,
}

impl FnClause {
    pub fn arity(&self) -> FnArity {
        if self.rest.is_some() {
            FnArity::at_least(self.params.len())
        } else {
            FnArity::exact(self.params.len())
        }
    }
}

/// A closure produced by `fn`, `defn` or `defmacro`.
#[derive(Clone, Debug)]
pub struct Lambda {
    pub id: usize,
    pub name: Option<String>,
    pub clauses: Vec<FnClause>,
    pub env: EnvRef,
    /// Namespace the closure was created in; its body resolves globals there.
    pub ns: String,
    pub meta: Option<MetaMap>,
}

impl Lambda {
    pub fn select_clause(&self, argc: usize) -> Result<&FnClause, EmberError> {
        self.clauses
            .iter()
            .find(|clause| clause.rest.is_none() && clause.params.len() == argc)
            .or_else(|| {
                self.clauses
                    .iter()
                    .find(|clause| clause.arity().accepts(argc))
            })
            .ok_or_else(|| {
                let expected: Vec<String> = self
                    .clauses
                    .iter()
                    .map(|clause| clause.arity().describe())
                    .collect();
                EmberError::arity(format!(
                    "{} expects {} arguments, got {}",
                    self.display_name(),
                    expected.join(" or "),
                    argc
                ))
            })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous fn")
    }

    pub fn arglists(&self) -> Value {
        Value::list(
            self.clauses
                .iter()
                .map(|clause| {
                    let mut params = clause.params.clone();
                    if let Some(rest) = &clause.rest {
                        params.push(Value::symbol("&"));
                        params.push(rest.clone());
                    }
                    Value::vector(params)
                })
                .collect(),
        )
    }
}

/// Build a closure from the operands of `fn`:
/// `name? [params] {:pre [...]}? body...` or `name? ([params] body...)+`.
pub fn build_fn(args: &[Value], env: &EnvRef, ns: &str) -> Result<Lambda, EmberError> {
    let (name, rest) = match args.first() {
        Some(Value::Symbol(sym)) if sym.ns.is_none() => (Some(sym.name.clone()), &args[1..]),
        _ => (None, args),
    };
    let clauses = parse_clauses(rest)?;
    Ok(Lambda {
        id: NEXT_FN_ID.fetch_add(1, Ordering::Relaxed),
        name,
        clauses,
        env: env.clone(),
        ns: ns.to_string(),
        meta: None,
    })
}

pub fn parse_clauses(forms: &[Value]) -> Result<Vec<FnClause>, EmberError> {
    match forms.first() {
        Some(Value::Vector(_)) => Ok(vec![parse_clause(forms)?]),
        Some(Value::List(_)) => {
            let mut clauses = Vec::new();
            for form in forms {
                let Value::List(items) = form else {
                    return Err(EmberError::runtime(
                        "fn: multi-arity clauses must all be lists",
                    ));
                };
                let items: Vec<Value> = items.iter().cloned().collect();
                clauses.push(parse_clause(&items)?);
            }
            check_clauses(&clauses)?;
            Ok(clauses)
        }
        _ => Err(EmberError::runtime("fn: expected parameter vector")),
    }
}

fn parse_clause(forms: &[Value]) -> Result<FnClause, EmberError> {
    let Some(Value::Vector(param_forms)) = forms.first() else {
        return Err(EmberError::runtime("fn: expected parameter vector"));
    };
    let mut params = Vec::new();
    let mut rest = None;
    let mut iter = param_forms.iter();
    while let Some(param) = iter.next() {
        if param.as_simple_symbol() == Some("&") {
            let rest_pat = iter
                .next()
                .ok_or_else(|| EmberError::runtime("fn: & must be followed by a parameter"))?;
            rest = Some(rest_pat.clone());
            if iter.next().is_some() {
                return Err(EmberError::runtime("fn: only one parameter may follow &"));
            }
            break;
        }
        params.push(param.clone());
    }
    let mut body = forms[1..].to_vec();
    let mut pre = Vec::new();
    // a leading condition map only counts when a body follows it
    if body.len() > 1 {
        if let Value::Map(map) = &body[0] {
            if let Some(conds) = map.get(&Key::keyword("pre")) {
                let conds = conds
                    .as_seq()
                    .ok_or_else(|| EmberError::runtime("fn: :pre expects a vector"))?;
                pre = conds.iter().cloned().collect();
                body.remove(0);
            }
        }
    }
    Ok(FnClause {
        params,
        rest,
        pre,
        body,
    })
}

fn check_clauses(clauses: &[FnClause]) -> Result<(), EmberError> {
    let variadic: Vec<&FnClause> = clauses.iter().filter(|c| c.rest.is_some()).collect();
    if variadic.len() > 1 {
        return Err(EmberError::runtime("fn: only one variadic arity allowed"));
    }
    let mut seen = std::collections::HashSet::new();
    for clause in clauses.iter().filter(|c| c.rest.is_none()) {
        if !seen.insert(clause.params.len()) {
            return Err(EmberError::runtime(format!(
                "fn: duplicate arity {}",
                clause.params.len()
            )));
        }
        if let Some(v) = variadic.first() {
            if clause.params.len() > v.params.len() {
                return Err(EmberError::runtime(
                    "fn: fixed arity cannot exceed the variadic arity",
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{new_ref, Env};
    use crate::reader::read_source;

    fn build(src: &str) -> Result<Lambda, EmberError> {
        let form = read_source(src).unwrap().remove(0);
        let items: Vec<Value> = form.as_seq().unwrap().iter().cloned().collect();
        build_fn(&items[1..], &new_ref(Env::default()), "user")
    }

    #[test]
    fn single_arity_with_precondition() {
        let f = build("(fn sq [x] {:pre [(pos? x)]} (* x x))").unwrap();
        assert_eq!(f.name.as_deref(), Some("sq"));
        assert_eq!(f.clauses[0].pre.len(), 1);
        assert_eq!(f.clauses[0].body.len(), 1);
    }

    #[test]
    fn lone_map_is_the_body() {
        let f = build("(fn [] {:pre 1})").unwrap();
        assert!(f.clauses[0].pre.is_empty());
        assert_eq!(f.clauses[0].body.len(), 1);
    }

    #[test]
    fn multi_arity_selection() {
        let f = build("(fn ([] 0) ([x] 1) ([x & more] 2))").unwrap();
        assert_eq!(f.select_clause(0).unwrap().params.len(), 0);
        assert_eq!(f.select_clause(1).unwrap().params.len(), 1);
        assert!(f.select_clause(5).unwrap().rest.is_some());
    }

    #[test]
    fn duplicate_arity_rejected() {
        assert!(build("(fn ([x] 1) ([y] 2))").is_err());
    }

    #[test]
    fn arity_error_on_mismatch() {
        let f = build("(fn [a b] a)").unwrap();
        assert!(matches!(f.select_clause(1), Err(EmberError::Arity(_))));
    }
}
