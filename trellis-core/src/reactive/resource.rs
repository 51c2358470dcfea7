//! Async resources with loading states.
//!
//! A resource runs a fetcher inside an effect, so it re-fetches whenever
//! the signals the fetcher reads change. Its state (value, error, loading)
//! lives in ordinary signals and can be read from any computation.
//!
//! Every fetch is tagged with a generation number. When an asynchronous
//! fetch settles, its result is applied only if no newer fetch has started
//! since; otherwise it is dropped. Asynchronous fetches are spawned with
//! [`tokio::task::spawn_local`] and so must run inside a
//! [`tokio::task::LocalSet`].

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tracing::trace;

use super::batch::batch;
use super::context::untrack;
use super::effect::Effect;
use super::owner::on_cleanup;
use super::signal::Signal;
use super::trigger::Trigger;

/// Where a resource is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// No fetch has started yet.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The latest fetch succeeded.
    Ready,
    /// The latest fetch failed.
    Errored,
}

impl ResourceState {
    pub fn is_loading(self) -> bool {
        self == ResourceState::Loading
    }

    pub fn is_ready(self) -> bool {
        self == ResourceState::Ready
    }

    pub fn is_errored(self) -> bool {
        self == ResourceState::Errored
    }
}

/// What happens to the current value when a new fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Refresh {
    /// Keep the previous value readable until the new one arrives.
    #[default]
    KeepValue,
    /// Clear the value as soon as the fetch starts.
    Reset,
}

/// The outcome of invoking a fetcher: either already settled or a future
/// to await.
pub enum Fetch<T, E> {
    Ready(Result<T, E>),
    Pending(Pin<Box<dyn Future<Output = Result<T, E>>>>),
}

impl<T, E> Fetch<T, E> {
    pub fn pending(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Fetch::Pending(Box::pin(future))
    }
}

impl<T, E> From<Result<T, E>> for Fetch<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Fetch::Ready(result)
    }
}

impl<T, E> fmt::Debug for Fetch<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetch::Ready(result) => f
                .debug_tuple("Ready")
                .field(&if result.is_ok() { "Ok(..)" } else { "Err(..)" })
                .finish(),
            Fetch::Pending(_) => f.write_str("Pending"),
        }
    }
}

#[derive(Default)]
struct FetchState {
    generation: Cell<u64>,
    refresh: Cell<Refresh>,
}

impl FetchState {
    /// Start a new generation, superseding anything in flight.
    fn advance(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }
}

/// The signals a resource exposes.
struct Cells<T: 'static, E: 'static> {
    value: Signal<Option<T>>,
    error: Signal<Option<E>>,
    state: Signal<ResourceState>,
}

impl<T: 'static, E: 'static> Clone for Cells<T, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static, E: 'static> Copy for Cells<T, E> {}

impl<T: 'static, E: 'static> Cells<T, E> {
    fn begin(&self, refresh: Refresh) {
        untrack(|| {
            batch(|| {
                if refresh == Refresh::Reset {
                    self.value.modify(|value| *value = None);
                }
                self.state.set(ResourceState::Loading);
            })
        });
    }

    fn settle(&self, fetch: &FetchState, generation: u64, result: Result<T, E>) {
        if !fetch.is_current(generation) {
            trace!(
                generation,
                latest = fetch.generation.get(),
                "discarding stale resource result"
            );
            return;
        }

        untrack(|| {
            batch(|| match result {
                Ok(value) => {
                    self.value.modify(|slot| *slot = Some(value));
                    if self.error.with_untracked(Option::is_some) {
                        self.error.modify(|slot| *slot = None);
                    }
                    self.state.set(ResourceState::Ready);
                }
                Err(error) => {
                    self.error.modify(|slot| *slot = Some(error));
                    self.state.set(ResourceState::Errored);
                }
            })
        });
    }
}

/// An async-aware derived value with loading and error state.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Resource, Signal};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = tokio::task::LocalSet::new();
/// local
///     .run_until(async {
///         let user_id = Signal::new(1);
///         let user = Resource::new(
///             move || user_id.get(),
///             |id| async move { Ok::<_, String>(format!("user {id}")) },
///         );
///
///         assert!(user.loading());
///         while user.loading() {
///             tokio::task::yield_now().await;
///         }
///         assert_eq!(user.read().as_deref(), Some("user 1"));
///     })
///     .await;
/// # }
/// ```
pub struct Resource<T: 'static, E: 'static = String> {
    cells: Cells<T, E>,
    trigger: Trigger,
    driver: Effect,
    fetch: Rc<FetchState>,
}

impl<T: 'static, E: 'static> Resource<T, E> {
    /// Create a resource that re-fetches whenever `source` changes.
    ///
    /// Only `source` is tracked; `fetcher` runs untracked with its output.
    pub fn new<S, F, Fut>(source: impl Fn() -> S + 'static, fetcher: F) -> Self
    where
        F: Fn(S) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::from_fetcher(move || {
            let input = source();
            Fetch::pending(untrack(|| fetcher(input)))
        })
    }

    /// Create a resource from a synchronous fetcher. Every signal the
    /// fetcher reads is tracked.
    pub fn new_sync(fetcher: impl Fn() -> Result<T, E> + 'static) -> Self {
        Self::from_fetcher(move || Fetch::Ready(fetcher()))
    }

    /// Create a resource from a fetcher that may settle now or later. Every
    /// signal the fetcher reads while producing the [`Fetch`] is tracked.
    pub fn from_fetcher(fetcher: impl Fn() -> Fetch<T, E> + 'static) -> Self {
        let cells = Cells {
            value: Signal::new(None),
            error: Signal::new(None),
            state: Signal::new(ResourceState::Idle),
        };
        let trigger = Trigger::new();
        let fetch = Rc::new(FetchState::default());

        let driver = {
            let fetch = fetch.clone();
            Effect::new(move || {
                trigger.track();
                let generation = fetch.advance();
                let pending = fetcher();

                cells.begin(fetch.refresh.take());
                match pending {
                    Fetch::Ready(result) => cells.settle(&fetch, generation, result),
                    Fetch::Pending(future) => {
                        let fetch = fetch.clone();
                        tokio::task::spawn_local(async move {
                            let result = future.await;
                            cells.settle(&fetch, generation, result);
                        });
                    }
                }

                // Disposal supersedes whatever is still in flight.
                let fetch = fetch.clone();
                on_cleanup(move || {
                    fetch.advance();
                });
            })
        };

        Self {
            cells,
            trigger,
            driver,
            fetch,
        }
    }

    /// Borrow the latest value, subscribing the running computation.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.cells.value.with(|value| f(value.as_ref()))
    }

    /// Whether a fetch is in flight.
    pub fn loading(&self) -> bool {
        self.cells.state.get().is_loading()
    }

    pub fn state(&self) -> ResourceState {
        self.cells.state.get()
    }

    /// Re-run the fetcher, keeping the current value until the new one
    /// arrives.
    pub fn refresh(&self) {
        self.refresh_with(Refresh::KeepValue);
    }

    /// Re-run the fetcher with an explicit choice about the current value.
    pub fn refresh_with(&self, refresh: Refresh) {
        self.fetch.refresh.set(refresh);
        self.trigger.notify();
    }

    /// Edit the ready value in place. Does nothing if there is none.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) {
        if self.cells.value.with_untracked(Option::is_some) {
            self.cells.value.modify(|value| {
                if let Some(value) = value {
                    f(value);
                }
            });
        }
    }

    /// Current fetch generation. Increases with every fetch and disposal.
    pub fn generation(&self) -> u64 {
        self.fetch.generation.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.driver.is_disposed()
    }

    /// Stop fetching and free the resource's signals. Results still in
    /// flight are discarded.
    pub fn dispose(&self) {
        self.driver.dispose();
        self.trigger.dispose();
        self.cells.value.dispose();
        self.cells.error.dispose();
        self.cells.state.dispose();
    }
}

impl<T: Clone + 'static, E: 'static> Resource<T, E> {
    /// The latest successful value, subscribing the running computation.
    pub fn read(&self) -> Option<T> {
        self.cells.value.get()
    }
}

impl<T: 'static, E: Clone + 'static> Resource<T, E> {
    /// The error from the latest fetch, if it failed.
    pub fn error(&self) -> Option<E> {
        self.cells.error.get()
    }
}

impl<T: 'static, E: 'static> Clone for Resource<T, E> {
    fn clone(&self) -> Self {
        Self {
            cells: self.cells,
            trigger: self.trigger,
            driver: self.driver,
            fetch: self.fetch.clone(),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Resource<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("driver", &self.driver)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Create a resource that re-fetches whenever `source` changes.
pub fn create_resource<T, E, S, F, Fut>(
    source: impl Fn() -> S + 'static,
    fetcher: F,
) -> Resource<T, E>
where
    T: 'static,
    E: 'static,
    F: Fn(S) -> Fut + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    Resource::new(source, fetcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Memo};
    use std::cell::RefCell;

    #[test]
    fn sync_resource_settles_immediately() {
        let id = Signal::new(2);
        let resource: Resource<i32> = Resource::new_sync(move || Ok(id.get() * 10));

        assert_eq!(resource.state(), ResourceState::Ready);
        assert_eq!(resource.read(), Some(20));

        id.set(3);
        assert_eq!(resource.read(), Some(30));
        assert_eq!(resource.generation(), 3);
    }

    #[test]
    fn failure_keeps_the_last_value() {
        let input = Signal::new(Ok::<i32, String>(1));
        let resource = Resource::new_sync(move || input.get());
        assert_eq!(resource.read(), Some(1));

        input.set(Err("boom".into()));
        assert_eq!(resource.state(), ResourceState::Errored);
        assert_eq!(resource.error().as_deref(), Some("boom"));
        assert_eq!(resource.read(), Some(1));

        input.set(Ok(2));
        assert_eq!(resource.error(), None);
        assert_eq!(resource.read(), Some(2));
    }

    #[test]
    fn refresh_reruns_the_fetcher() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let resource: Resource<u32> = Resource::new_sync(move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(calls_clone.get())
        });

        resource.refresh();
        assert_eq!(calls.get(), 2);
        assert_eq!(resource.read(), Some(2));
    }

    #[test]
    fn mutate_edits_the_ready_value() {
        let resource: Resource<Vec<u8>> = Resource::new_sync(|| Ok(vec![1]));
        let lengths = Rc::new(RefCell::new(Vec::new()));
        let lengths_clone = lengths.clone();
        let watched = resource.clone();
        let len = Memo::new(move || resource_len(&watched));
        let _effect = Effect::new(move || lengths_clone.borrow_mut().push(len.get()));

        resource.mutate(|v| v.push(2));
        assert_eq!(*lengths.borrow(), vec![1, 2]);
    }

    fn resource_len(resource: &Resource<Vec<u8>>) -> usize {
        resource.with(|value| value.map_or(0, Vec::len))
    }

    #[test]
    fn disposed_resource_stops_fetching() {
        let id = Signal::new(1);
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let resource: Resource<i32> = Resource::new_sync(move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(id.get())
        });

        resource.dispose();
        assert!(resource.is_disposed());
        id.set(2);
        assert_eq!(calls.get(), 1);
    }
}
