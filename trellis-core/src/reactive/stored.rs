//! Stored Values
//!
//! A stored value lives in the runtime's arena and is freed with its owner,
//! like a signal, but it never takes part in tracking. Computations use it
//! for state they keep between runs without reacting to it.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::config::report_misuse;
use crate::error::ReactiveError;
use crate::graph::{AnyValue, NodeId, NodeKind};

use super::runtime::with_runtime;

const KIND: &str = "stored value";

/// An owned, untracked value.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::StoredValue;
///
/// let history = StoredValue::new(Vec::new());
/// history.update_value(|h| h.push(1));
/// assert_eq!(history.with_value(Vec::len), 1);
/// ```
pub struct StoredValue<T: 'static> {
    id: NodeId,
    ty: PhantomData<fn() -> T>,
}

impl<T: 'static> StoredValue<T> {
    /// Store `value` under the current owner.
    pub fn new(value: T) -> Self {
        let slot: AnyValue = Rc::new(RefCell::new(value));
        Self {
            id: with_runtime(|rt| rt.create_source(slot)),
            ty: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the value. Nothing is tracked.
    pub fn try_with_value<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let slot = self.slot()?;
        let value = slot.try_borrow().map_err(|_| self.borrowed())?;
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(ReactiveError::type_mismatch::<T>)?;
        Ok(f(value))
    }

    /// Borrow the value. Nothing is tracked.
    ///
    /// # Panics
    ///
    /// Panics if the value has been disposed or is being updated.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with_value(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Mutate the value in place. Nothing is notified.
    pub fn try_update_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ReactiveError> {
        let slot = self.slot()?;
        let mut value = slot.try_borrow_mut().map_err(|_| self.borrowed())?;
        let value = value
            .downcast_mut::<T>()
            .ok_or_else(ReactiveError::type_mismatch::<T>)?;
        Ok(f(value))
    }

    /// Mutate the value in place. Nothing is notified.
    ///
    /// Updating a disposed value is reported through the misuse policy.
    pub fn update_value(&self, f: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_update_value(f) {
            report_misuse(err);
        }
    }

    /// Replace the value.
    pub fn set_value(&self, value: T) {
        self.update_value(|current| *current = value);
    }

    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.contains_node(self.id))
    }

    /// Free the value before its owner is disposed.
    pub fn dispose(&self) {
        if let Err(err) = with_runtime(|rt| rt.dispose_node(self.id)) {
            report_misuse(err);
        }
    }

    fn slot(&self) -> Result<AnyValue, ReactiveError> {
        with_runtime(|rt| rt.value(self.id, NodeKind::Source))
            .map_err(|_| ReactiveError::disposed(KIND, self.id))
    }

    fn borrowed(&self) -> ReactiveError {
        ReactiveError::borrowed(KIND, self.id)
    }
}

impl<T: Clone + 'static> StoredValue<T> {
    pub fn try_get_value(&self) -> Result<T, ReactiveError> {
        self.try_with_value(T::clone)
    }

    /// Clone the value out.
    pub fn get_value(&self) -> T {
        self.with_value(T::clone)
    }
}

impl<T: 'static> Clone for StoredValue<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for StoredValue<T> {}

impl<T: 'static> fmt::Debug for StoredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredValue").field("id", &self.id).finish()
    }
}

/// Create a stored value.
pub fn create_stored_value<T: 'static>(value: T) -> StoredValue<T> {
    StoredValue::new(value)
}
