//! Process-wide handle registry (C2).
//!
//! Every creatable object (context, branch, ...) is wrapped in a
//! reference-counted, type-tagged cell and registered under an opaque
//! [`Handle`]. Objects may declare a dependency on another handle; the
//! registry refuses to destroy an object while something still depends on
//! it, which is how the library enforces "a branch outlives the connections
//! it spawned" without a GC.
//!
//! Grounded on the session-repository pattern used for `SessionManager`
//! (concurrent `DashMap`-backed storage with atomic create/remove), extended
//! with a dependency edge list for destroy-order enforcement.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Result, YogiError};

/// Opaque, pointer-sized handle returned to ABI callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Reinterprets a raw ABI value (e.g. received from C) as a handle.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

struct Entry {
    type_name: &'static str,
    object: Arc<dyn Any + Send + Sync>,
    /// Handles that `object` depends on; kept alive transitively and used to
    /// populate `dependents` on the other end.
    depends_on: Vec<Handle>,
    /// Handles that depend on `object`; non-empty blocks `destroy`.
    dependents: Vec<Handle>,
    on_destroy: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Process-wide table mapping handles to typed, reference-counted objects.
///
/// A single instance is shared by the whole process (mirroring the C ABI's
/// "library load/unload bounds the table's lifetime" contract); tests
/// typically construct a private instance instead.
#[derive(Default)]
pub struct HandleRegistry {
    entries: DashMap<Handle, Entry>,
    next: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Registers `object` under a freshly allocated handle, declaring its
    /// dependencies on already-registered handles.
    ///
    /// Returns `InvalidHandle` if any entry in `depends_on` is not
    /// currently registered.
    pub fn register<T>(&self, type_name: &'static str, object: T, depends_on: &[Handle]) -> Result<Handle>
    where
        T: Any + Send + Sync + 'static,
    {
        for dep in depends_on {
            if !self.entries.contains_key(dep) {
                return Err(YogiError::InvalidHandle);
            }
        }

        let handle = Handle(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            handle,
            Entry {
                type_name,
                object: Arc::new(object),
                depends_on: depends_on.to_vec(),
                dependents: Vec::new(),
                on_destroy: Mutex::new(None),
            },
        );
        for dep in depends_on {
            if let Some(mut entry) = self.entries.get_mut(dep) {
                entry.dependents.push(handle);
            }
        }
        Ok(handle)
    }

    /// Registers a callback invoked exactly once when `handle` is destroyed,
    /// used to cancel outstanding async operations on the object.
    pub fn on_destroy(&self, handle: Handle, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        let entry = self.entries.get(&handle).ok_or(YogiError::InvalidHandle)?;
        *entry.on_destroy.lock() = Some(Box::new(callback));
        Ok(())
    }

    /// Looks up the object behind `handle`, verifying its concrete type.
    pub fn lookup<T>(&self, handle: Handle) -> Result<Arc<T>>
    where
        T: Any + Send + Sync + 'static,
    {
        let entry = self.entries.get(&handle).ok_or(YogiError::InvalidHandle)?;
        entry
            .object
            .clone()
            .downcast::<T>()
            .map_err(|_| YogiError::WrongObjectType)
    }

    /// Returns the declared type name for diagnostics (`WrongObjectType`
    /// error rendering, debugging tools).
    pub fn type_name(&self, handle: Handle) -> Option<&'static str> {
        self.entries.get(&handle).map(|e| e.type_name)
    }

    /// Destroys `handle`, failing with `ObjectStillUsed` while any other
    /// registered object declares a dependency on it.
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        let has_dependents = self
            .entries
            .get(&handle)
            .ok_or(YogiError::InvalidHandle)?
            .dependents
            .iter()
            .any(|d| self.entries.contains_key(d));
        if has_dependents {
            return Err(YogiError::ObjectStillUsed);
        }

        let (_, entry) = self.entries.remove(&handle).ok_or(YogiError::InvalidHandle)?;
        for dep in &entry.depends_on {
            if let Some(mut dep_entry) = self.entries.get_mut(dep) {
                dep_entry.dependents.retain(|h| *h != handle);
            }
        }
        if let Some(cb) = entry.on_destroy.lock().take() {
            cb();
        }
        Ok(())
    }

    /// Tears down every remaining object in dependency order (leaves first),
    /// used by process-wide shutdown. Unlike [`HandleRegistry::destroy`] this
    /// never fails: objects with surviving dependents are simply deferred to
    /// a later pass.
    pub fn destroy_all(&self) {
        loop {
            let leaves: Vec<Handle> = self
                .entries
                .iter()
                .filter(|e| e.dependents.iter().all(|d| !self.entries.contains_key(d)))
                .map(|e| *e.key())
                .collect();
            if leaves.is_empty() {
                break;
            }
            for handle in leaves {
                let _ = self.destroy(handle);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_after_register_succeeds_and_fails_after_destroy() {
        let registry = HandleRegistry::new();
        let handle = registry.register("counter", 42i32, &[]).unwrap();

        assert_eq!(*registry.lookup::<i32>(handle).unwrap(), 42);
        assert!(matches!(
            registry.lookup::<u64>(handle).unwrap_err(),
            YogiError::WrongObjectType
        ));

        registry.destroy(handle).unwrap();
        assert!(matches!(
            registry.lookup::<i32>(handle).unwrap_err(),
            YogiError::InvalidHandle
        ));
    }

    #[test]
    fn destroy_fails_while_dependent_is_alive() {
        let registry = HandleRegistry::new();
        let parent = registry.register("parent", 1u32, &[]).unwrap();
        let _child = registry.register("child", 2u32, &[parent]).unwrap();

        assert!(matches!(
            registry.destroy(parent).unwrap_err(),
            YogiError::ObjectStillUsed
        ));
    }

    #[test]
    fn destroy_all_tears_down_in_dependency_order() {
        let registry = HandleRegistry::new();
        let parent = registry.register("parent", 1u32, &[]).unwrap();
        let _child = registry.register("child", 2u32, &[parent]).unwrap();

        registry.destroy_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn on_destroy_callback_runs_exactly_once() {
        let registry = HandleRegistry::new();
        let handle = registry.register("obj", 1u32, &[]).unwrap();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        registry
            .on_destroy(handle, move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.destroy(handle).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
