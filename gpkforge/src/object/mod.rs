//! Live objects and the lazy-load state machine.
//!
//! Constructing an object from a table entry is cheap and reads no payload;
//! the payload is deserialized on the first `load()`. Exactly one
//! [`LiveObject`] exists per resolved index per package, and at most one
//! deserialization runs per object at a time:
//!
//! ```text
//! Unloaded ──claim──► Loading ──deserialize + post-load──► Loaded
//!     ▲                  │
//!     └──────── error ───┘
//! ```
//!
//! A `load()` call that finds the object already `Loading` returns
//! immediately with [`LoadOutcome::InFlight`]; callers that need completion
//! use [`LiveObject::wait_loaded`] or the joinable task from
//! `Package::load_object_async`.

pub mod factory;
pub mod kinds;

pub use factory::{ClassFactory, KindCtor};
pub use kinds::{
    BulkData, ClassKind, GenericKind, MipLevel, ObjectKind, RedirectorKind, SerialContext,
    TextureKind, BULK_INLINE,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::package::Package;
use crate::properties::Property;

/// Shared handle to a live object.
pub type SharedObject = Arc<LiveObject>;

/// Lifecycle state of a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// What a `load()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// This call performed the deserialization.
    Loaded,
    /// The payload was already present.
    AlreadyLoaded,
    /// Another caller holds the Loading state; the payload may not be
    /// present yet when this returns.
    InFlight,
}

/// The in-memory instantiation of one export table entry.
pub struct LiveObject {
    package: Weak<Package>,
    index: PackageIndex,
    name: String,
    class_name: String,

    state: Mutex<LoadState>,
    loaded_cond: Condvar,
    properties: RwLock<Vec<Property>>,
    kind: Mutex<Box<dyn ObjectKind>>,

    dirty: AtomicBool,
    deserialize_count: AtomicU64,
}

impl LiveObject {
    pub(crate) fn new(
        package: Weak<Package>,
        index: PackageIndex,
        name: String,
        class_name: String,
        kind: Box<dyn ObjectKind>,
    ) -> SharedObject {
        Arc::new(Self {
            package,
            index,
            name,
            class_name,
            state: Mutex::new(LoadState::Unloaded),
            loaded_cond: Condvar::new(),
            properties: RwLock::new(Vec::new()),
            kind: Mutex::new(kind),
            dirty: AtomicBool::new(false),
            deserialize_count: AtomicU64::new(0),
        })
    }

    /// Table index of this object in its owning package.
    pub fn index(&self) -> PackageIndex {
        self.index
    }

    /// Object name including any instance number suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The owning package, if it is still alive.
    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }

    pub fn state(&self) -> LoadState {
        *self.state.lock()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Deserialize the payload if this object is still unloaded.
    ///
    /// Claims the `Loading` state, reads the payload through the owning
    /// package (which loads the object's class first, possibly recursing
    /// into other packages), runs post-load, and publishes `Loaded`. On
    /// error the object reverts to `Unloaded` and may be retried.
    pub fn load(self: &Arc<Self>) -> FormatResult<LoadOutcome> {
        {
            let mut state = self.state.lock();
            match *state {
                LoadState::Loaded => return Ok(LoadOutcome::AlreadyLoaded),
                LoadState::Loading => return Ok(LoadOutcome::InFlight),
                LoadState::Unloaded => *state = LoadState::Loading,
            }
        }

        let package = match self.package.upgrade() {
            Some(package) => package,
            None => {
                self.abort_load();
                return Err(FormatError::NotLoaded {
                    name: self.name.clone(),
                });
            }
        };

        match package.deserialize_object(self) {
            Ok(()) => {
                self.deserialize_count.fetch_add(1, Ordering::Relaxed);
                let mut state = self.state.lock();
                *state = LoadState::Loaded;
                self.loaded_cond.notify_all();
                debug!(object = %self.name, class = %self.class_name, "loaded object");
                Ok(LoadOutcome::Loaded)
            }
            Err(err) => {
                self.abort_load();
                Err(err)
            }
        }
    }

    fn abort_load(&self) {
        let mut state = self.state.lock();
        *state = LoadState::Unloaded;
        self.loaded_cond.notify_all();
    }

    /// Block until no load is in flight. Returns true if the object ended
    /// up loaded.
    pub fn wait_loaded(&self) -> bool {
        let mut state = self.state.lock();
        while *state == LoadState::Loading {
            self.loaded_cond.wait(&mut state);
        }
        *state == LoadState::Loaded
    }

    /// Cloned property list, if loaded.
    pub fn properties(&self) -> Option<Vec<Property>> {
        if self.is_loaded() {
            Some(self.properties.read().clone())
        } else {
            None
        }
    }

    /// Replace the property list and mark the object dirty.
    pub fn set_properties(&self, properties: Vec<Property>) -> FormatResult<()> {
        if !self.is_loaded() {
            return Err(FormatError::NotLoaded {
                name: self.name.clone(),
            });
        }
        *self.properties.write() = properties;
        self.mark_dirty();
        Ok(())
    }

    /// Run `f` against the kind-specific payload.
    pub fn with_kind<R>(&self, f: impl FnOnce(&dyn ObjectKind) -> R) -> R {
        let kind = self.kind.lock();
        f(kind.as_ref())
    }

    /// Run `f` against the kind-specific payload mutably. Does not mark the
    /// object dirty; callers editing payload data pair this with
    /// [`LiveObject::mark_dirty`].
    pub fn with_kind_mut<R>(&self, f: impl FnOnce(&mut dyn ObjectKind) -> R) -> R {
        let mut kind = self.kind.lock();
        f(kind.as_mut())
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Number of completed deserialization passes over this object.
    pub fn deserialize_count(&self) -> u64 {
        self.deserialize_count.load(Ordering::Relaxed)
    }

    /// Install a freshly deserialized property list. Package-internal.
    pub(crate) fn install_properties(&self, properties: Vec<Property>) {
        *self.properties.write() = properties;
    }
}

impl std::fmt::Debug for LiveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveObject")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("class", &self.class_name)
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(name: &str) -> SharedObject {
        LiveObject::new(
            Weak::new(),
            PackageIndex(1),
            name.to_string(),
            "Generic".to_string(),
            Box::<GenericKind>::default(),
        )
    }

    #[test]
    fn test_fresh_object_is_unloaded() {
        let obj = orphan("Thing");
        assert_eq!(obj.state(), LoadState::Unloaded);
        assert_eq!(obj.properties(), None);
        assert!(!obj.is_dirty());
        assert_eq!(obj.deserialize_count(), 0);
    }

    #[test]
    fn test_load_without_package_reverts_to_unloaded() {
        let obj = orphan("Thing");
        let err = obj.load().unwrap_err();
        assert!(matches!(err, FormatError::NotLoaded { .. }));
        // The Loading claim must have been released.
        assert_eq!(obj.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_set_properties_requires_loaded() {
        let obj = orphan("Thing");
        let err = obj.set_properties(Vec::new()).unwrap_err();
        assert!(matches!(err, FormatError::NotLoaded { .. }));
    }

    #[test]
    fn test_wait_loaded_on_idle_object() {
        let obj = orphan("Thing");
        // No load in flight: returns without blocking.
        assert!(!obj.wait_loaded());
    }
}
