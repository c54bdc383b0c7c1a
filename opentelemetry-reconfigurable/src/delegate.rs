//! Swappable delegate cells shared by the reconfigurable providers.
//!
//! A [`DelegateCell`] holds the backend implementation currently installed for
//! one signal. Reads are lock free and always observe a fully constructed
//! delegate: the cell is created with a no-op implementation and is only ever
//! replaced wholesale, never mutated in place.
//!
//! Every installation is tagged with a generation number. Handles that cache a
//! backend object (a delegate tracer, a delegate counter, ...) remember the
//! generation they were bound at and rebind as soon as the cell moves on, see
//! [`Rebinding`].
use arc_swap::{ArcSwap, ArcSwapOption};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A delegate installed in a [`DelegateCell`].
pub struct Installed<P: ?Sized> {
    generation: u64,
    provider: Arc<P>,
}

impl<P: ?Sized> Installed<P> {
    /// Generation this delegate was installed at. Generation `0` is the
    /// initial delegate the cell was created with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The installed backend implementation.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

impl<P: ?Sized> fmt::Debug for Installed<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installed")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Holds the current backend implementation for one signal kind.
pub struct DelegateCell<P: ?Sized> {
    current: ArcSwap<Installed<P>>,
    next_generation: AtomicU64,
}

impl<P: ?Sized> DelegateCell<P> {
    /// Create a cell holding `initial` at generation `0`.
    pub fn new(initial: Arc<P>) -> Self {
        DelegateCell {
            current: ArcSwap::from_pointee(Installed {
                generation: 0,
                provider: initial,
            }),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns the current delegate. Never blocks.
    pub fn get(&self) -> Arc<Installed<P>> {
        self.current.load_full()
    }

    /// Atomically replaces the current delegate, returning the previous one.
    ///
    /// Once this returns, every subsequent [`get`](Self::get) observes
    /// `provider`. Callers that loaded the previous delegate before the swap
    /// finish their operation against it.
    pub fn set(&self, provider: Arc<P>) -> Arc<P> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.current.swap(Arc::new(Installed {
            generation,
            provider,
        }));
        previous.provider.clone()
    }
}

impl<P: ?Sized> fmt::Debug for DelegateCell<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateCell")
            .field("generation", &self.current.load().generation)
            .finish()
    }
}

/// A backend object bound at a given delegate generation.
pub(crate) struct Binding<T> {
    generation: u64,
    target: T,
}

impl<T> Binding<T> {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Deref for Binding<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

/// Caches a backend object derived from a delegate, rebuilding it whenever
/// the delegate generation changes.
///
/// Concurrent rebinds may both build a target; the last store wins and any
/// stale binding is discarded on the next lookup because generations are
/// compared for equality against the delegate the caller just loaded.
pub(crate) struct Rebinding<T> {
    cached: ArcSwapOption<Binding<T>>,
}

impl<T> Rebinding<T> {
    pub(crate) fn new() -> Self {
        Rebinding {
            cached: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn get_or_bind(&self, generation: u64, bind: impl FnOnce() -> T) -> Arc<Binding<T>> {
        if let Some(bound) = self.cached.load_full() {
            if bound.generation == generation {
                return bound;
            }
        }
        let bound = Arc::new(Binding {
            generation,
            target: bind(),
        });
        self.cached.store(Some(bound.clone()));
        bound
    }
}

impl<T> fmt::Debug for Rebinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generation = self.cached.load().as_ref().map(|b| b.generation);
        f.debug_struct("Rebinding")
            .field("generation", &generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn initial_delegate_is_visible_before_any_set() {
        let cell: DelegateCell<str> = DelegateCell::new(Arc::from("noop"));
        let current = cell.get();
        assert_eq!(current.generation(), 0);
        assert_eq!(&**current.provider(), "noop");
    }

    #[test]
    fn set_returns_previous_and_advances_generation() {
        let cell: DelegateCell<str> = DelegateCell::new(Arc::from("noop"));
        let previous = cell.set(Arc::from("first"));
        assert_eq!(&*previous, "noop");

        let previous = cell.set(Arc::from("second"));
        assert_eq!(&*previous, "first");

        let current = cell.get();
        assert_eq!(current.generation(), 2);
        assert_eq!(&**current.provider(), "second");
    }

    #[test]
    fn rebinding_reuses_target_within_a_generation() {
        let builds = AtomicUsize::new(0);
        let rebinding = Rebinding::new();
        let bind = || {
            builds.fetch_add(1, Ordering::SeqCst);
            "bound"
        };

        let first = rebinding.get_or_bind(0, bind);
        let second = rebinding.get_or_bind(0, bind);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let third = rebinding.get_or_bind(1, bind);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(**third, "bound");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn readers_only_observe_installed_delegates() {
        let cell: Arc<DelegateCell<String>> = Arc::new(DelegateCell::new(Arc::new(
            "delegate-0".to_string(),
        )));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let current = cell.get();
                        assert_eq!(
                            current.provider().as_str(),
                            format!("delegate-{}", current.generation())
                        );
                    }
                })
            })
            .collect();

        for i in 1..=100u64 {
            cell.set(Arc::new(format!("delegate-{i}")));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.get().generation(), 100);
    }
}
