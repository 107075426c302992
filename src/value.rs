//! The OMG value model: the tagged universe of runtime values and their
//! coercion rules.
//!
//! `List` and `Dict` are reference-shared: cloning a `Value::List` clones the
//! `Rc`, not the backing vector, so two bindings that hold "the same" list
//! observe each other's mutations. `FrozenDict` is a plain (non-shared, since
//! it can never change) snapshot produced by `freeze`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type FrozenDictRef = Rc<IndexMap<String, Value>>;
pub type GlobalsRef = Rc<RefCell<HashMap<String, Value>>>;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    None,
    List(ListRef),
    Dict(DictRef),
    FrozenDict(FrozenDictRef),
    /// Index into the function table, its name (for `stringify`, §3.1), and
    /// the globals mapping captured at definition time (see the design note
    /// on captured globals).
    FuncRef(u16, Rc<str>, GlobalsRef),
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_dict(pairs: Vec<(String, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(pairs.into_iter().collect())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
            Value::Bool(_) => "Bool",
            Value::None => "None",
            Value::List(_) => "List",
            Value::Dict(_) => "Dict",
            Value::FrozenDict(_) => "FrozenDict",
            Value::FuncRef(..) => "FuncRef",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::None => false,
            Value::List(l) => !l.borrow().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::FrozenDict(d) => !d.is_empty(),
            Value::FuncRef(..) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Read-only view over a Dict or FrozenDict's pairs, for code paths
    /// (INDEX, ATTR, length) that don't care whether the mapping is frozen.
    pub fn with_dict_pairs<R>(&self, f: impl FnOnce(&IndexMap<String, Value>) -> R) -> Option<R> {
        match self {
            Value::Dict(d) => Some(f(&d.borrow())),
            Value::FrozenDict(d) => Some(f(d)),
            _ => None,
        }
    }

    /// The canonical stringifier used by `+` coercion and `EMIT`.
    ///
    /// Guards against reentry on the same List/Dict identity so that a
    /// malformed, self-referential container prints a placeholder instead of
    /// recursing without bound.
    pub fn stringify(&self) -> String {
        let mut visited = Vec::new();
        self.stringify_inner(&mut visited)
    }

    fn stringify_inner(&self, visited: &mut Vec<usize>) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::None => "none".to_string(),
            Value::List(l) => {
                let ptr = Rc::as_ptr(l) as usize;
                if visited.contains(&ptr) {
                    return "[...]".to_string();
                }
                visited.push(ptr);
                let items = l.borrow();
                let inner: Vec<String> = items.iter().map(|v| v.stringify_inner(visited)).collect();
                visited.pop();
                format!("[{}]", inner.join(", "))
            }
            Value::Dict(d) => {
                let ptr = Rc::as_ptr(d) as usize;
                if visited.contains(&ptr) {
                    return "{...}".to_string();
                }
                visited.push(ptr);
                let pairs = d.borrow();
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.stringify_inner(visited)))
                    .collect();
                visited.pop();
                format!("{{{}}}", inner.join(", "))
            }
            Value::FrozenDict(d) => {
                let ptr = Rc::as_ptr(d) as usize;
                if visited.contains(&ptr) {
                    return "{...}".to_string();
                }
                visited.push(ptr);
                let inner: Vec<String> = d
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.stringify_inner(visited)))
                    .collect();
                visited.pop();
                format!("{{{}}}", inner.join(", "))
            }
            Value::FuncRef(_, name, _) => format!("<fn {}>", name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

fn dict_eq(a: &IndexMap<String, Value>, b: &IndexMap<String, Value>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| bv == v))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => dict_eq(&a.borrow(), &b.borrow()),
            (Value::FrozenDict(a), Value::FrozenDict(b)) => dict_eq(a, b),
            (Value::Dict(a), Value::FrozenDict(b)) | (Value::FrozenDict(b), Value::Dict(a)) => {
                dict_eq(&a.borrow(), b)
            }
            (Value::FuncRef(a, _, _), Value::FuncRef(b, _, _)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truthiness_matches_table() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::None.is_truthy());
        assert!(!Value::new_list(vec![]).is_truthy());
        assert!(Value::new_list(vec![Value::Int(1)]).is_truthy());
    }

    #[test]
    fn list_is_reference_shared() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let alias = list.clone();
        if let Value::List(l) = &list {
            l.borrow_mut().push(Value::Int(2));
        }
        if let Value::List(l) = &alias {
            assert_eq!(l.borrow().len(), 2);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn frozen_dict_equals_its_dict_origin() {
        let dict = Value::new_dict(vec![("a".to_string(), Value::Int(1))]);
        let frozen = if let Value::Dict(d) = &dict {
            Value::FrozenDict(Rc::new(d.borrow().clone()))
        } else {
            unreachable!()
        };
        assert_eq!(dict, frozen);
    }

    #[test]
    fn cyclic_list_stringifies_with_placeholder() {
        let list = Value::new_list(vec![Value::Int(1)]);
        if let Value::List(l) = &list {
            l.borrow_mut().push(list.clone());
        }
        assert_eq!(list.stringify(), "[1, [...]]");
    }

    #[test]
    fn cross_type_equality_is_always_false() {
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Int(0), Value::None);
    }

    #[test]
    fn func_ref_stringifies_by_name_not_index() {
        let globals: GlobalsRef = Rc::new(RefCell::new(HashMap::new()));
        let f = Value::FuncRef(3, Rc::from("countdown"), globals);
        assert_eq!(f.stringify(), "<fn countdown>");
    }

    #[test]
    fn func_ref_equality_is_by_index_not_name() {
        let globals: GlobalsRef = Rc::new(RefCell::new(HashMap::new()));
        let a = Value::FuncRef(3, Rc::from("countdown"), globals.clone());
        let b = Value::FuncRef(3, Rc::from("renamed"), globals);
        assert_eq!(a, b);
    }
}
