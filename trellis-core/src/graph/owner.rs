//! Owner Nodes
//!
//! Owners form the disposal tree. Every node is created under at most one
//! owner, and every memo or effect carries its own scope owner for whatever
//! its body creates. Disposing an owner disposes its child owners, then its
//! nodes, then runs its cleanups, all in reverse creation order.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::new_key_type;

use super::node::NodeId;

new_key_type! {
    /// Generational index of an owner scope.
    pub struct OwnerId;
}

/// A cleanup callback registered through `on_cleanup`.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// A scope in the ownership tree.
#[derive(Default)]
pub(crate) struct OwnerNode {
    /// Enclosing owner; `None` for a root.
    pub(crate) parent: Option<OwnerId>,

    /// Child owners created by `create_root` under this one.
    pub(crate) children: IndexSet<OwnerId>,

    /// Nodes created while this owner was current.
    pub(crate) nodes: IndexSet<NodeId>,

    /// Cleanups registered while this owner was current.
    pub(crate) cleanups: Vec<Cleanup>,

    /// Values provided through `provide_context`.
    pub(crate) contexts: HashMap<TypeId, Rc<dyn Any>>,
}

impl OwnerNode {
    /// Create an owner nested under `parent`.
    pub(crate) fn new(parent: Option<OwnerId>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }

    /// Move everything this owner holds into a detached [`OwnerContents`],
    /// leaving the owner itself alive and empty.
    pub(crate) fn take_contents(&mut self) -> OwnerContents {
        self.contexts.clear();
        OwnerContents {
            children: std::mem::take(&mut self.children),
            nodes: std::mem::take(&mut self.nodes),
            cleanups: std::mem::take(&mut self.cleanups),
        }
    }
}

/// Everything an owner held at the moment it was reset or removed.
///
/// Disposal happens on this detached value so that no arena borrow is held
/// while user cleanups run.
#[derive(Default)]
pub(crate) struct OwnerContents {
    pub(crate) children: IndexSet<OwnerId>,
    pub(crate) nodes: IndexSet<NodeId>,
    pub(crate) cleanups: Vec<Cleanup>,
}

impl OwnerContents {
    pub(crate) fn is_empty(&self) -> bool {
        self.children.is_empty() && self.nodes.is_empty() && self.cleanups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn take_contents_empties_the_owner() {
        let mut owners = slotmap::SlotMap::<OwnerId, ()>::with_key();
        let child = owners.insert(());

        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();

        let mut owner = OwnerNode::new(None);
        owner.children.insert(child);
        owner.cleanups.push(Box::new(move || ran_clone.set(true)));
        owner.contexts.insert(TypeId::of::<u8>(), Rc::new(1u8));

        let contents = owner.take_contents();
        assert!(!contents.is_empty());
        assert!(owner.children.is_empty());
        assert!(owner.cleanups.is_empty());
        assert!(owner.contexts.is_empty());

        for cleanup in contents.cleanups {
            cleanup();
        }
        assert!(ran.get());
    }
}
