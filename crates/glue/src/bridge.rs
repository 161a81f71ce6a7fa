//! The bridge directory: a fixed-capacity table of named bridges shared by
//! every attached port.
//!
//! The table sits behind a reader-writer lock. Lookups take the read side
//! and may run in any context; attach and detach take the write side,
//! which masks interrupts. A bridge is published only once fully built,
//! and entries are reference counted: detaching removes the table's
//! reference, and the bridge itself is freed when the last reader that
//! looked it up lets go.
//!
//! ## Behaviors
//! - [R1] bridge names are unique; the table has a fixed number of slots
//! - [R2] readers run concurrently, a writer excludes readers and writers
//! - [R3] a detached bridge stays valid for readers still holding it
//! - [R4] teardown releases every entry

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use kport_hal::{IrqSafeRwLock, IrqSafeWriteGuard};
use kport_utils::RwLockReadGuard;

use crate::error::{GlueError, GlueResult};
use crate::lock::{NonSleepingGuard, PortableLock};

/// One bridge: a name plus its own lock-protected state.
pub struct Bridge<S> {
    name: String,
    state: PortableLock<S>,
}

impl<S> Bridge<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock this bridge's state.
    pub fn lock(&self) -> NonSleepingGuard<'_, S> {
        self.state.acquire()
    }
}

type Slots<S> = Vec<Option<Arc<Bridge<S>>>>;

/// Table of bridges owned by the subsystem's init/teardown pair.
pub struct BridgeDirectory<S> {
    slots: IrqSafeRwLock<Slots<S>>,
}

impl<S> BridgeDirectory<S> {
    /// Directory with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        log::debug!("bridge directory: {capacity} slots");
        Self {
            slots: IrqSafeRwLock::new(slots),
        }
    }

    /// [R2] Shared access (`BDG_RLOCK`).
    pub fn read(&self) -> DirectoryReader<'_, S> {
        DirectoryReader(self.slots.read())
    }

    /// [R2] Exclusive access (`BDG_WLOCK`).
    pub fn write(&self) -> DirectoryWriter<'_, S> {
        DirectoryWriter(self.slots.write())
    }

    /// [R1] Create and publish a bridge.
    pub fn attach(&self, name: &str, state: S) -> GlueResult<Arc<Bridge<S>>> {
        self.write().insert(name, state)
    }

    /// [R3] Unpublish a bridge, returning the directory's reference.
    pub fn detach(&self, name: &str) -> GlueResult<Arc<Bridge<S>>> {
        self.write().remove(name).ok_or(GlueError::NoDevice)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Bridge<S>>> {
        self.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.read().0.len()
    }

    /// [R4] Release every entry; returns how many were still attached.
    pub fn teardown(self) -> usize {
        let mut slots = self.slots.write();
        let released = slots.iter_mut().filter_map(Option::take).count();
        drop(slots);
        if released != 0 {
            log::warn!("bridge directory: released {released} attached bridges at teardown");
        }
        released
    }
}

fn find<'a, S>(slots: &'a Slots<S>, name: &str) -> Option<&'a Arc<Bridge<S>>> {
    slots.iter().flatten().find(|b| b.name == name)
}

/// Read side of the directory.
pub struct DirectoryReader<'a, S>(RwLockReadGuard<'a, Slots<S>>);

impl<S> DirectoryReader<'_, S> {
    pub fn get(&self, name: &str) -> Option<&Arc<Bridge<S>>> {
        find(&self.0, name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Bridge<S>>> {
        self.0.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write side of the directory.
pub struct DirectoryWriter<'a, S>(IrqSafeWriteGuard<'a, Slots<S>>);

impl<S> DirectoryWriter<'_, S> {
    pub fn get(&self, name: &str) -> Option<&Arc<Bridge<S>>> {
        find(&self.0, name)
    }

    /// [R1] Publish a new bridge in the first free slot.
    pub fn insert(&mut self, name: &str, state: S) -> GlueResult<Arc<Bridge<S>>> {
        if self.get(name).is_some() {
            log::error!("bridge {name}: already attached");
            return Err(GlueError::NameInUse);
        }
        let Some(slot) = self.0.iter_mut().find(|s| s.is_none()) else {
            log::error!("bridge {name}: directory full");
            return Err(GlueError::TableFull);
        };
        let bridge = Arc::new(Bridge {
            name: String::from(name),
            state: PortableLock::new("bridge", state),
        });
        *slot = Some(bridge.clone());
        log::debug!("bridge {name}: attached");
        Ok(bridge)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Bridge<S>>> {
        let bridge = self
            .0
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|b| b.name == name))?
            .take();
        log::debug!("bridge {name}: detached");
        bridge
    }
}
