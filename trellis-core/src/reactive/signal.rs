//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    running computation is recorded as a dependent.
//!
//! 2. When a signal's value changes, dependents are marked and queued
//!    effects run before the write returns (or when the enclosing batch
//!    finishes).
//!
//! 3. Writing a value equal to the current one does nothing.
//!
//! # Memory Layout
//!
//! A `Signal<T>` is a `Copy` key into the runtime's node arena. The value
//! itself lives in the arena and is freed when the signal's owner is
//! disposed (or when [`Signal::dispose`] is called).

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::config::report_misuse;
use crate::error::ReactiveError;
use crate::graph::{AnyValue, NodeId, NodeKind};

use super::batch::defer_effects;
use super::context::untrack;
use super::runtime::with_runtime;
use super::subscriber::{Listener, Subscription};

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T: 'static> {
    id: NodeId,
    ty: PhantomData<fn() -> T>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal under the current owner.
    pub fn new(value: T) -> Self {
        let slot: AnyValue = Rc::new(RefCell::new(value));
        Self {
            id: with_runtime(|rt| rt.create_source(slot)),
            ty: PhantomData,
        }
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the value, subscribing the running computation.
    ///
    /// The value is borrowed for the duration of `f`. Writing this signal
    /// from inside `f` fails with [`ReactiveError::Borrowed`]; effects
    /// triggered by other writes inside `f` run after it returns.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let slot = with_runtime(|rt| {
            let slot = rt.value(self.id, NodeKind::Source)?;
            rt.track(self.id);
            Ok::<_, ReactiveError>(slot)
        })?;
        defer_effects(|| self.read_slot(&slot, f))
    }

    /// Borrow the value, subscribing the running computation.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Borrow the value without subscribing anything.
    pub fn try_with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let slot = with_runtime(|rt| rt.value(self.id, NodeKind::Source))?;
        defer_effects(|| self.read_slot(&slot, f))
    }

    /// Borrow the value without subscribing anything.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with_untracked(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Mutate the value in place and notify dependents.
    ///
    /// There is no old value to compare against, so this always propagates.
    pub fn try_modify(&self, f: impl FnOnce(&mut T)) -> Result<(), ReactiveError> {
        let slot = with_runtime(|rt| rt.value(self.id, NodeKind::Source))?;
        {
            let mut value = slot.try_borrow_mut().map_err(|_| self.borrowed())?;
            let value = value
                .downcast_mut::<T>()
                .ok_or_else(ReactiveError::type_mismatch::<T>)?;
            f(value);
        }
        with_runtime(|rt| rt.source_changed(self.id))
    }

    /// Mutate the value in place and notify dependents.
    ///
    /// Writing a disposed signal is reported through the misuse policy.
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_modify(f) {
            report_misuse(err);
        }
    }

    /// Attach an external listener called with each new value.
    ///
    /// Listeners are not computations: they run right after the write,
    /// even inside a batch, and reads they perform are untracked.
    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> Result<Subscription, ReactiveError>
    where
        T: Clone,
    {
        let signal = *self;
        let listener = Listener::new(move || {
            if let Ok(value) = untrack(|| signal.try_get()) {
                callback(value);
            }
        });
        let id = listener.id;
        with_runtime(|rt| rt.add_listener(self.id, listener))?;
        Ok(Subscription::new(self.id, id))
    }

    /// Number of writes that changed the value.
    pub fn version(&self) -> u64 {
        with_runtime(|rt| rt.with_node(self.id, |node| node.version)).unwrap_or(0)
    }

    /// Number of computations that read this signal on their last run.
    pub fn subscriber_count(&self) -> usize {
        with_runtime(|rt| rt.with_node(self.id, |node| node.dependents().len())).unwrap_or(0)
    }

    /// Number of attached external listeners.
    pub fn listener_count(&self) -> usize {
        with_runtime(|rt| rt.with_node(self.id, |node| node.listeners.len())).unwrap_or(0)
    }

    /// Check whether the signal has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.contains_node(self.id))
    }

    /// Free the signal. Computations that read it keep their last value.
    pub fn dispose(&self) {
        if let Err(err) = with_runtime(|rt| rt.dispose_node(self.id)) {
            report_misuse(err);
        }
    }

    /// A handle that can only read.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal { inner: *self }
    }

    /// A handle that can only write.
    pub fn write_only(&self) -> WriteSignal<T> {
        WriteSignal { inner: *self }
    }

    /// Split into read and write halves.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (self.read_only(), self.write_only())
    }

    /// Borrow the type-erased slot as `T`.
    fn read_slot<R>(
        &self,
        slot: &AnyValue,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, ReactiveError> {
        let value = slot.try_borrow().map_err(|_| self.borrowed())?;
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(ReactiveError::type_mismatch::<T>)?;
        Ok(f(value))
    }

    fn borrowed(&self) -> ReactiveError {
        ReactiveError::borrowed(NodeKind::Source.label(), self.id)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get a clone of the value, subscribing the running computation.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.try_with(T::clone)
    }

    /// Get a clone of the value, subscribing the running computation.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get a clone of the value without subscribing anything.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Replace the value and notify dependents if it changed.
    ///
    /// Fails if the signal has been disposed or the resulting flush does not
    /// settle.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        let slot = with_runtime(|rt| rt.value(self.id, NodeKind::Source))?;
        let previous = {
            let mut current = slot.try_borrow_mut().map_err(|_| self.borrowed())?;
            let current = current
                .downcast_mut::<T>()
                .ok_or_else(ReactiveError::type_mismatch::<T>)?;
            if *current == value {
                return Ok(());
            }
            std::mem::replace(current, value)
        };
        drop(previous);
        with_runtime(|rt| rt.source_changed(self.id))
    }

    /// Replace the value and notify dependents if it changed.
    ///
    /// Writing a disposed signal is reported through the misuse policy.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            report_misuse(err);
        }
    }

    /// Compute the next value from the current one.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        let next = self.try_with_untracked(f)?;
        self.try_set(next)
    }

    /// Compute the next value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(err) = self.try_update(f) {
            report_misuse(err);
        }
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Signal<T> {}

impl<T: 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for Signal<T> {}

impl<T: 'static> Hash for Signal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Signal");
        s.field("id", &self.id);
        match self.try_with_untracked(|value| format!("{value:?}")) {
            Ok(value) => s.field("value", &format_args!("{value}")),
            Err(_) => s.field("disposed", &true),
        };
        s.finish()
    }
}

/// Read half of a signal.
pub struct ReadSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id()
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.inner.try_with(f)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with_untracked(f)
    }

    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> Result<Subscription, ReactiveError>
    where
        T: Clone,
    {
        self.inner.subscribe(callback)
    }
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.inner.try_get()
    }

    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.get_untracked()
    }
}

/// Write half of a signal.
pub struct WriteSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id()
    }

    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        self.inner.modify(f)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl<T: PartialEq + 'static> WriteSignal<T> {
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        self.inner.try_set(value)
    }

    pub fn set(&self, value: T) {
        self.inner.set(value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.update(f)
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for ReadSignal<T> {}

impl<T: 'static> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for WriteSignal<T> {}

impl<T: fmt::Debug + 'static> fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.inner).finish()
    }
}

impl<T: 'static> fmt::Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteSignal").field(&self.inner.id).finish()
    }
}

/// Create a signal and return its read and write halves.
pub fn create_signal<T: 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}
