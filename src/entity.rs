//! Entity store: the typed state holder higher constructs attach to.
//!
//! An [`Entity`] carries a closed set of optional component slots:
//! - [`Endpoint`]: a peer's wire id, display name, and local mute flag
//! - [`Session`](crate::session::Session): an established connection context
//! - [`FileEntry`](crate::share::FileEntry) / [`FolderEntry`](crate::share::FolderEntry): share metadata
//! - [`Transfer`](crate::transfer::Transfer): an in-flight chunked transfer
//!
//! A component not present locally is resolved through the parent chain
//! (`find_*` accessors), so a per-request child entity sees the session and
//! endpoint of the connection it belongs to. Parents are held as weak
//! back-links only; ownership always flows down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::session::Session;
use crate::share::{FileEntry, FolderEntry};
use crate::transfer::Transfer;

/// Status value shared by security groups, transfers, and transfer workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    None,
    Pending,
    Info,
    Success,
    Warning,
    Error,
    Cancelled,
    Unknown,
}

impl Status {
    /// True for states that end a worker's run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Success | Status::Warning | Status::Error | Status::Cancelled
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::None => "none",
            Status::Pending => "pending",
            Status::Info => "info",
            Status::Success => "success",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
            Status::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A peer visible on the overlay.
///
/// The mute flag is a purely local decision: muted peers still get protocol
/// acknowledgments, their content just never reaches the event bus.
#[derive(Debug)]
pub struct Endpoint {
    id: String,
    name: Mutex<String>,
    muted: AtomicBool,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Mutex::new(name.into()),
            muted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Peers may rename themselves; every inbound message carries the
    /// current display name.
    pub fn set_name(&self, name: impl Into<String>) {
        if let Ok(mut guard) = self.name.lock() {
            *guard = name.into();
        }
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Slots {
    endpoint: Option<Arc<Endpoint>>,
    session: Option<Arc<Session>>,
    file: Option<Arc<FileEntry>>,
    folder: Option<Arc<FolderEntry>>,
    transfer: Option<Arc<Transfer>>,
}

/// Typed component holder with parent-chain fallback.
///
/// The slot set is closed: every component kind is a named field, looked up
/// without any runtime type machinery. All slot access holds the internal
/// lock only for the in-memory read or write.
#[derive(Debug, Default)]
pub struct Entity {
    parent: Option<Weak<Entity>>,
    slots: RwLock<Slots>,
}

macro_rules! slot_accessors {
    ($slot:ident, $ty:ty, $add:ident, $remove:ident, $has:ident, $get:ident, $find:ident) => {
        pub fn $add(&self, value: Arc<$ty>) {
            if let Ok(mut slots) = self.slots.write() {
                slots.$slot = Some(value);
            }
        }

        pub fn $remove(&self) -> Option<Arc<$ty>> {
            self.slots.write().ok().and_then(|mut s| s.$slot.take())
        }

        pub fn $has(&self) -> bool {
            self.$get().is_some()
        }

        pub fn $get(&self) -> Option<Arc<$ty>> {
            self.slots.read().ok().and_then(|s| s.$slot.clone())
        }

        /// Like the plain accessor, but walks the parent chain when the
        /// slot is empty locally.
        pub fn $find(&self) -> Option<Arc<$ty>> {
            if let Some(found) = self.$get() {
                return Some(found);
            }
            let mut parent = self.parent();
            while let Some(entity) = parent {
                if let Some(found) = entity.$get() {
                    return Some(found);
                }
                parent = entity.parent();
            }
            None
        }
    };
}

impl Entity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_parent(parent: &Arc<Entity>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::downgrade(parent)),
            slots: RwLock::new(Slots::default()),
        })
    }

    pub fn parent(&self) -> Option<Arc<Entity>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    slot_accessors!(
        endpoint,
        Endpoint,
        add_endpoint,
        remove_endpoint,
        has_endpoint,
        endpoint,
        find_endpoint
    );
    slot_accessors!(
        session,
        Session,
        add_session,
        remove_session,
        has_session,
        session,
        find_session
    );
    slot_accessors!(file, FileEntry, add_file, remove_file, has_file, file, find_file);
    slot_accessors!(
        folder,
        FolderEntry,
        add_folder,
        remove_folder,
        has_folder,
        folder,
        find_folder
    );
    slot_accessors!(
        transfer,
        Transfer,
        add_transfer,
        remove_transfer,
        has_transfer,
        transfer,
        find_transfer
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_add_get_remove() {
        let entity = Entity::new();
        assert!(!entity.has_endpoint());

        entity.add_endpoint(Arc::new(Endpoint::new("abc", "alice")));
        assert!(entity.has_endpoint());
        assert_eq!(entity.endpoint().unwrap().id(), "abc");

        let removed = entity.remove_endpoint().unwrap();
        assert_eq!(removed.id(), "abc");
        assert!(!entity.has_endpoint());
    }

    #[test]
    fn test_parent_fallback() {
        let root = Entity::new();
        root.add_endpoint(Arc::new(Endpoint::new("root-id", "root")));

        let child = Entity::with_parent(&root);
        let grandchild = Entity::with_parent(&child);

        // Not set locally anywhere below the root.
        assert!(grandchild.endpoint().is_none());
        assert_eq!(grandchild.find_endpoint().unwrap().id(), "root-id");

        // A local value shadows the parent's.
        child.add_endpoint(Arc::new(Endpoint::new("child-id", "child")));
        assert_eq!(grandchild.find_endpoint().unwrap().id(), "child-id");
    }

    #[test]
    fn test_parent_is_weak() {
        let child = {
            let root = Entity::new();
            root.add_endpoint(Arc::new(Endpoint::new("gone", "gone")));
            Entity::with_parent(&root)
        };

        // Root dropped; fallback finds nothing instead of keeping it alive.
        assert!(child.find_endpoint().is_none());
    }

    #[test]
    fn test_endpoint_mute_and_rename() {
        let endpoint = Endpoint::new("id", "old");
        assert!(!endpoint.muted());

        endpoint.set_muted(true);
        assert!(endpoint.muted());

        endpoint.set_name("new");
        assert_eq!(endpoint.name(), "new");
    }

    #[test]
    fn test_status_terminal() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::None.is_terminal());
    }
}
