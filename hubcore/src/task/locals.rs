use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Key/value storage shared by a task and every task it spawns.
///
/// Only populated when the hub tracks the task tree. A root task gets a
/// fresh map; a child task shares its spawner's map, so a value set by any
/// task of the tree is visible to all of them.
#[derive(Clone, Default)]
pub struct TreeLocals(Rc<RefCell<HashMap<String, String>>>);

impl TreeLocals {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.borrow().get(key).cloned()
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.borrow_mut().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.0.borrow_mut().remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Returns `true` if both handles point to the same map.
    pub fn ptr_eq(&self, other: &TreeLocals) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TreeLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_between_clones() {
        let root = TreeLocals::new();
        let child = root.clone();

        assert!(root.insert("request", "42").is_none());
        assert_eq!(child.get("request").as_deref(), Some("42"));
        assert!(root.ptr_eq(&child));
        assert!(!root.ptr_eq(&TreeLocals::new()));

        assert_eq!(child.remove("request").as_deref(), Some("42"));
        assert!(root.is_empty());
    }
}
