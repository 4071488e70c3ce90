//! Registry of exceptions discovered across searches.
//!
//! The registry is an explicit value threaded through construction rather
//! than process-wide state: `new → seed a manager → run → hand to the next
//! run`. A key is recorded the first time any execution produces it, and a
//! later search over the same program can seed its initial goal set from
//! the accumulated keys.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::execution::ThrownException;

/// Identity of an exception goal: where it was thrown and what was thrown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionKey {
    pub class_name: String,
    pub method_name: String,
    pub exception_type: String,
}

impl ExceptionKey {
    pub fn from_thrown(thrown: &ThrownException) -> Self {
        ExceptionKey {
            class_name: thrown.class_name.clone(),
            method_name: thrown.method_name.clone(),
            exception_type: thrown.exception_type.clone(),
        }
    }
}

impl std::fmt::Display for ExceptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}:{}",
            self.class_name, self.method_name, self.exception_type
        )
    }
}

/// Insertion-ordered set of every exception key seen so far.
#[derive(Debug, Clone, Default)]
pub struct ExceptionRegistry {
    known: IndexSet<ExceptionKey>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        ExceptionRegistry::default()
    }

    /// Records a key; returns `true` when it was not known before.
    pub fn register(&mut self, key: ExceptionKey) -> bool {
        self.known.insert(key)
    }

    pub fn contains(&self, key: &ExceptionKey) -> bool {
        self.known.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExceptionKey> {
        self.known.iter()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ty: &str) -> ExceptionKey {
        ExceptionKey {
            class_name: "com.example.Stack".to_string(),
            method_name: "pop()".to_string(),
            exception_type: ty.to_string(),
        }
    }

    #[test]
    fn test_first_registration_is_new() {
        let mut registry = ExceptionRegistry::new();
        assert!(registry.register(key("java.util.EmptyStackException")));
        assert!(!registry.register(key("java.util.EmptyStackException")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_iteration_preserves_discovery_order() {
        let mut registry = ExceptionRegistry::new();
        registry.register(key("B"));
        registry.register(key("A"));
        let order: Vec<&str> = registry.iter().map(|k| k.exception_type.as_str()).collect();
        assert_eq!(order, vec!["B", "A"]);
    }
}
