//! Lexical scopes.
//!
//! A [`Container`] maps names to objects for one scope. It may delegate every
//! operation to another container (a call frame viewing a caller's storage
//! without copying it), and it may have a previous container consulted only
//! when a read misses locally. A [`ScopeStack`] is the chain of containers of
//! one evaluation, innermost last.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ScopeError;
use crate::value::{Object, Payload};

#[derive(Default)]
struct ContainerData {
    delegate: Option<Container>,
    previous: Option<Container>,
    base: BTreeMap<String, Object>,
}

/// Shared handle to one scope's name table.
#[derive(Clone, Default)]
pub struct Container(Rc<RefCell<ContainerData>>);

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container forwarding everything to `target`.
    pub fn delegating_to(target: &Container) -> Result<Self, ScopeError> {
        let container = Self::new();
        container.set_delegated_container(target)?;
        Ok(container)
    }

    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_delegated(&self) -> bool {
        self.0.borrow().delegate.is_some()
    }

    /// End of the delegation chain; the container that actually stores names.
    fn resolve(&self) -> Container {
        let mut current = self.clone();
        loop {
            let next = current.0.borrow().delegate.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    pub fn set_delegated_container(&self, target: &Container) -> Result<&Self, ScopeError> {
        let mut cursor = Some(target.clone());
        while let Some(container) = cursor {
            if container.ptr_eq(self) {
                return Err(ScopeError::DelegationCycle);
            }
            cursor = container.0.borrow().delegate.clone();
        }
        let mut data = self.0.borrow_mut();
        data.base.clear();
        data.delegate = Some(target.clone());
        Ok(self)
    }

    pub fn set_previous_container(&self, previous: Option<&Container>) -> &Self {
        self.resolve().0.borrow_mut().previous = previous.cloned();
        self
    }

    /// Inserts `name` unless it already exists in this container.
    pub fn add(&self, name: &str, value: Object) -> bool {
        let target = self.resolve();
        let mut data = target.0.borrow_mut();
        if data.base.contains_key(name) {
            return false;
        }
        data.base.insert(name.to_string(), value);
        true
    }

    pub fn replace(&self, name: &str, value: Object) {
        // Evicted object drops after the borrow is released.
        let evicted = self
            .resolve()
            .0
            .borrow_mut()
            .base
            .insert(name.to_string(), value);
        drop(evicted);
    }

    pub fn dispose(&self, name: &str) -> bool {
        let removed = self.resolve().0.borrow_mut().base.remove(name);
        removed.is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve().0.borrow().base.contains_key(name)
    }

    /// Looks up `name` locally, then along the previous-container chain when
    /// `forward_seeking` is set.
    pub fn find(&self, name: &str, forward_seeking: bool) -> Option<Object> {
        let mut current = self.resolve();
        loop {
            let (found, previous) = {
                let data = current.0.borrow();
                (data.base.get(name).cloned(), data.previous.clone())
            };
            if found.is_some() || !forward_seeking {
                return found;
            }
            current = previous?.resolve();
        }
    }

    /// Looks up `name` inside the struct bound to `domain`.
    pub fn find_with_domain(&self, name: &str, domain: &str, forward_seeking: bool) -> Option<Object> {
        let members = self.find(domain, forward_seeking)?.cast::<Container>().ok()?;
        members.find(name, false)
    }

    pub fn clear(&self) {
        let drained = std::mem::take(&mut self.resolve().0.borrow_mut().base);
        drop(drained);
    }

    /// Destroys every local binding except the names in `keep`.
    pub fn clear_except(&self, keep: &[&str]) {
        let target = self.resolve();
        let drained = {
            let mut data = target.0.borrow_mut();
            let (kept, drained): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut data.base)
                .into_iter()
                .partition(|(name, _)| keep.contains(&name.as_str()));
            data.base = kept;
            drained
        };
        drop(drained);
    }

    /// True when `object`, or the slot it refers to, is stored directly in
    /// this container.
    pub fn holds(&self, object: &Object) -> bool {
        let Ok(target) = object.deref() else {
            return false;
        };
        self.names().iter().any(|name| {
            self.find(name, false)
                .and_then(|member| member.deref().ok())
                .is_some_and(|member| member.ptr_eq(&target))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.resolve().0.borrow().base.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resolve().0.borrow().base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wraps this container as a struct value.
    pub fn into_object(self, type_id: impl Into<String>) -> Object {
        Object::owning(Payload::Struct(self), type_id)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("delegated", &self.is_delegated())
            .field("names", &self.names())
            .finish()
    }
}

/// Chain of scopes for one evaluation, innermost last.
#[derive(Debug)]
pub struct ScopeStack {
    base: Vec<Container>,
    delegated: bool,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// Stack holding only a fresh global container.
    pub fn new() -> Self {
        Self {
            base: vec![Container::new()],
            delegated: false,
        }
    }

    /// Stack whose root is a live view onto `root`.
    pub fn delegated(root: &Container) -> Result<Self, ScopeError> {
        let mut stack = Self::new();
        stack.set_delegated_root(root)?;
        Ok(stack)
    }

    pub fn depth(&self) -> usize {
        self.base.len()
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    pub fn current(&self) -> &Container {
        // `base` is never empty: `pop` refuses to remove the root.
        &self.base[self.base.len() - 1]
    }

    pub fn root(&self) -> &Container {
        &self.base[0]
    }

    /// Enters a scope. With `inherit_last_scope` the new scope falls back to
    /// the current one, otherwise straight to the root.
    ///
    /// The first push onto a freshly delegated single-scope stack only clears
    /// the delegation flag, so entering a delegated frame does not add depth.
    pub fn push(&mut self, inherit_last_scope: bool) -> &mut Self {
        if self.base.len() == 1 && self.delegated {
            self.delegated = false;
            return self;
        }

        let previous = if inherit_last_scope {
            self.current().clone()
        } else {
            self.root().clone()
        };
        let container = Container::new();
        container.set_previous_container(Some(&previous));
        self.base.push(container);
        tracing::trace!(depth = self.base.len(), inherit_last_scope, "scope pushed");
        self
    }

    /// Leaves the innermost scope, destroying what it owned. The root scope
    /// cannot be popped.
    pub fn pop(&mut self) -> bool {
        if self.base.len() <= 1 {
            return false;
        }
        let popped = self.base.pop();
        drop(popped);
        tracing::trace!(depth = self.base.len(), "scope popped");
        true
    }

    /// Pops until at most `depth` scopes remain.
    pub fn truncate(&mut self, depth: usize) {
        while self.base.len() > depth.max(1) {
            self.pop();
        }
    }

    pub fn set_delegated_root(&mut self, root: &Container) -> Result<&mut Self, ScopeError> {
        let container = Container::delegating_to(root)?;
        self.base[0] = container;
        self.delegated = true;
        Ok(self)
    }

    pub fn find(&self, name: &str) -> Option<Object> {
        self.current().find(name, true)
    }

    pub fn find_in_domain(&self, name: &str, domain: &str) -> Option<Object> {
        self.current().find_with_domain(name, domain, true)
    }

    /// Declares `name` in the innermost scope.
    pub fn create(&self, name: &str, value: Object) -> bool {
        self.current().add(name, value)
    }

    pub fn dispose_in_current(&self, name: &str) -> bool {
        self.current().dispose(name)
    }

    /// Disposes the innermost visible binding of `name`.
    pub fn dispose(&self, name: &str) -> bool {
        let mut current = Some(self.current().resolve());
        while let Some(container) = current {
            if container.dispose(name) {
                return true;
            }
            current = container.0.borrow().previous.clone().map(|c| c.resolve());
        }
        false
    }
}
