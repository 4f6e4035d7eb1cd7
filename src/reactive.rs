//! Reactive capabilities consumed by the execution model.
//!
//! Dependency tracking and re-invocation scheduling belong to the host: the
//! core hands a [`Binding`] to the sink, and the sink decides how a
//! [`Binding::Computed`] is wrapped into its own reactive cell.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::value::Value;

/// Dependency-tracked value holder. Identifier lookups read through cells.
pub trait ReactiveCell: Send + Sync {
    fn get(&self) -> Value;
}

/// Anything an `fsm` block can select a state sub-tree from.
pub trait StateMachine: Send + Sync {
    fn state(&self) -> String;
}

/// Minimal writable cell with a version counter.
///
/// Also usable as a [`StateMachine`]: its state is the displayed value.
pub struct Signal {
    value: RwLock<Value>,
    version: AtomicU64,
}

impl Signal {
    pub fn new(value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(value.into()),
            version: AtomicU64::new(0),
        })
    }

    pub fn set(&self, value: impl Into<Value>) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value.into();
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of `set` calls so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl ReactiveCell for Signal {
    fn get(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateMachine for Signal {
    fn state(&self) -> String {
        self.get().to_display_string()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.get())
            .field("version", &self.version())
            .finish()
    }
}

/// A re-runnable computation producing `T`.
pub struct Computation<T>(Arc<dyn Fn() -> T + Send + Sync>);

impl<T> Computation<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn get(&self) -> T {
        (self.0)()
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Value handed to a sink binding: fixed, or recomputed on demand.
pub enum Binding<T> {
    Static(T),
    Computed(Computation<T>),
}

impl<T: Clone> Binding<T> {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Binding::Computed(Computation::new(f))
    }

    /// Current value; runs the computation for computed bindings.
    pub fn get(&self) -> T {
        match self {
            Binding::Static(value) => value.clone(),
            Binding::Computed(computation) => computation.get(),
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Binding::Computed(_))
    }
}

impl<T: Clone> Clone for Binding<T> {
    fn clone(&self) -> Self {
        match self {
            Binding::Static(value) => Binding::Static(value.clone()),
            Binding::Computed(computation) => Binding::Computed(computation.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Binding::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}
