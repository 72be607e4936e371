//! Display registry (§4.I): owns every [`DisplayRef`] discovery has ever
//! produced, hands callers opaque handles instead of references into its
//! internal `Vec`, and enforces the "one open transport per display"
//! exclusivity rule independent of how many `DisplayHandle`s exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use bitflags::bitflags;
use thiserror::Error;

use crate::config::{OpClass, DEFAULT_MAX_TRIES};
use crate::mccs::Version as MccsVersion;
use crate::retry::TryStats;
use crate::sleep::PerDisplaySleepData;

bitflags! {
    /// Per-display feature-probing state accumulated during initial checks
    /// (§3 `DisplayRef` flags, §4.G).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DisplayFlags: u32 {
        const COMMUNICATION_WORKING                    = 1 << 0;
        const DDC_BUSY                                  = 1 << 1;
        const USES_DDC_FLAG_FOR_UNSUPPORTED             = 1 << 2;
        const USES_NULL_RESPONSE_FOR_UNSUPPORTED        = 1 << 3;
        const USES_MH_ML_SH_SL_ZERO_FOR_UNSUPPORTED     = 1 << 4;
        const DOES_NOT_INDICATE_UNSUPPORTED             = 1 << 5;
        const DDC_COMMUNICATION_CHECKED                 = 1 << 6;
        const REMOVED                                   = 1 << 7;
        const PHANTOM                                   = 1 << 8;
    }
}

/// The bus a display's DDC/CI traffic travels over (§3 `IoPath`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IoPath {
    I2c { sysnum: usize },
    Usb { path: String },
}

impl std::fmt::Display for IoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoPath::I2c { sysnum } => write!(f, "/dev/i2c-{sysnum}"),
            IoPath::Usb { path } => write!(f, "usb:{path}"),
        }
    }
}

/// Identity derived from a display's EDID, used as the key into the
/// persisted-state store (§6) and for phantom-display deduplication (§4.F).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdidId {
    pub mfg_id: [char; 3],
    pub model: u16,
    pub serial: u32,
}

/// Backend-specific detail kept alongside an [`IoPath`] for opening a
/// fresh [`crate::transport::Transport`] on demand.
#[derive(Debug, Clone)]
pub enum TransportDetail {
    I2c { sysnum: usize, force_slave_address: bool },
    #[cfg(feature = "usb")]
    Usb { vendor_id: u16, product_id: u16, path: String },
}

/// The persistent numbering ddcutil assigns at scan time (§3 `DispNo`).
/// `-1`/`-2` are sentinels, never valid handles into the registry.
pub type DispNo = i32;
pub const DISPNO_INVALID: DispNo = -1;
pub const DISPNO_PHANTOM: DispNo = -2;
pub const DISPNO_BUSY: DispNo = -3;

/// Everything the registry knows about one physical (or phantom) display.
///
/// Lives behind an `Arc` inside the registry's `Vec` so that
/// [`DisplayRefSnapshot`] can hand out cloned, point-in-time views without
/// holding the registry lock or exposing `&DisplayRef` to callers.
pub struct DisplayRef {
    dispno: AtomicI32,
    io_path: IoPath,
    transport_detail: TransportDetail,
    edid_id: Option<EdidId>,
    mccs_version: RwLock<Option<MccsVersion>>,
    flags: RwLock<DisplayFlags>,
    sleep_data: RwLock<PerDisplaySleepData>,
    try_stats: RwLock<HashMap<OpClass, TryStats>>,
    /// Set by phantom filtering (§4.G) to point a PHANTOM ref at the
    /// working ref whose EDID it shares. `None` for every non-phantom ref.
    real_display: RwLock<Option<DisplayRefHandle>>,
    lock: ExclusiveLock,
}

impl DisplayRef {
    pub fn new(io_path: IoPath, transport_detail: TransportDetail, edid_id: Option<EdidId>) -> Self {
        Self {
            dispno: AtomicI32::new(DISPNO_INVALID),
            io_path,
            transport_detail,
            edid_id,
            mccs_version: RwLock::new(None),
            flags: RwLock::new(DisplayFlags::empty()),
            sleep_data: RwLock::new(PerDisplaySleepData::new()),
            try_stats: RwLock::new(HashMap::new()),
            real_display: RwLock::new(None),
            lock: ExclusiveLock::new(),
        }
    }

    pub fn io_path(&self) -> &IoPath {
        &self.io_path
    }

    pub fn transport_detail(&self) -> &TransportDetail {
        &self.transport_detail
    }

    pub fn edid_id(&self) -> Option<&EdidId> {
        self.edid_id.as_ref()
    }

    pub fn dispno(&self) -> DispNo {
        self.dispno.load(Ordering::Acquire)
    }

    pub fn set_dispno(&self, dispno: DispNo) {
        self.dispno.store(dispno, Ordering::Release);
    }

    pub fn mccs_version(&self) -> Option<MccsVersion> {
        *self.mccs_version.read().expect("mccs_version lock poisoned")
    }

    pub fn set_mccs_version(&self, version: MccsVersion) {
        *self.mccs_version.write().expect("mccs_version lock poisoned") = Some(version);
    }

    pub fn flags(&self) -> DisplayFlags {
        *self.flags.read().expect("flags lock poisoned")
    }

    pub fn set_flags(&self, flags: DisplayFlags) {
        *self.flags.write().expect("flags lock poisoned") = flags;
    }

    pub fn insert_flags(&self, flags: DisplayFlags) {
        self.flags.write().expect("flags lock poisoned").insert(flags);
    }

    /// The working ref this one is a phantom of, if any (§3 "optional
    /// pointer to the real display").
    pub fn real_display(&self) -> Option<DisplayRefHandle> {
        *self.real_display.read().expect("real_display lock poisoned")
    }

    pub fn set_real_display(&self, handle: DisplayRefHandle) {
        *self.real_display.write().expect("real_display lock poisoned") = Some(handle);
    }

    pub fn with_sleep_data<R>(&self, f: impl FnOnce(&mut PerDisplaySleepData) -> R) -> R {
        f(&mut self.sleep_data.write().expect("sleep_data lock poisoned"))
    }

    /// Per-display, per-operation-class retry counters (§3 `TryStats`),
    /// created lazily on first use of a given [`OpClass`].
    pub fn with_try_stats<R>(&self, class: OpClass, f: impl FnOnce(&mut TryStats) -> R) -> R {
        let mut table = self.try_stats.write().expect("try_stats lock poisoned");
        let stats = table
            .entry(class)
            .or_insert_with(|| TryStats::new(DEFAULT_MAX_TRIES));
        f(stats)
    }

    /// Acquire exclusive access for the lifetime of the returned guard.
    /// Per §9's design note, this never hands back a `MutexGuard` tied to
    /// the registry's internal storage — only an atomic-bool flag that
    /// outlives any particular `Vec` reallocation.
    pub fn try_lock(self: &Arc<Self>) -> Option<LockGuard> {
        if self
            .lock
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(LockGuard {
                target: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// Backs [`DisplayRef::try_lock`]; a plain `Arc<AtomicBool>` would work
/// just as well, but wrapping it documents intent at the call site.
struct ExclusiveLock {
    busy: AtomicBool,
}

impl ExclusiveLock {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }
}

/// Proof of exclusive access to a [`DisplayRef`]; releases the lock when
/// dropped. Held by [`crate::DisplayHandle`], never exposed directly.
pub struct LockGuard {
    target: Arc<DisplayRef>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.target.lock.busy.store(false, Ordering::Release);
    }
}

impl LockGuard {
    pub fn display_ref(&self) -> &Arc<DisplayRef> {
        &self.target
    }
}

/// An opaque handle into the registry (§9 design note: never leak raw
/// references). Validated against `generation` on every use so a handle
/// from a display that has since been removed fails cleanly instead of
/// aliasing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayRefHandle {
    index: usize,
    generation: u64,
}

/// A cloned, immutable view of a [`DisplayRef`] at the moment it was
/// fetched from the registry — safe to hold across await points or
/// thread-pool boundaries without pinning the registry lock.
#[derive(Debug, Clone)]
pub struct DisplayRefSnapshot {
    pub dispno: DispNo,
    pub io_path: IoPath,
    pub edid_id: Option<EdidId>,
    pub mccs_version: Option<MccsVersion>,
    pub flags: DisplayFlags,
    pub real_display: Option<DisplayRefHandle>,
}

#[derive(Debug, Error)]
pub enum BusOpenError {
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("bus {0} not found")]
    NotFound(String),
    #[error("io error opening {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

struct Slot {
    display: Arc<DisplayRef>,
    generation: u64,
    removed: bool,
}

/// Owns all known displays. Readers-writer lock over the slot `Vec`
/// matches the teacher's I/O model: discovery and scans are the only
/// writers, VCP operations only ever read.
pub struct Registry {
    slots: RwLock<Vec<Slot>>,
    next_generation: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_generation: AtomicUsize::new(1),
        }
    }

    /// Insert a newly discovered display, returning a handle to it.
    pub fn insert(&self, display: DisplayRef) -> DisplayRefHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) as u64;
        let mut slots = self.slots.write().expect("registry lock poisoned");
        let index = slots.len();
        slots.push(Slot {
            display: Arc::new(display),
            generation,
            removed: false,
        });
        DisplayRefHandle { index, generation }
    }

    /// Resolve a handle to the live `Arc<DisplayRef>`, or `None` if the
    /// slot has since been marked removed (e.g. by a later rescan).
    pub fn resolve(&self, handle: DisplayRefHandle) -> Option<Arc<DisplayRef>> {
        let slots = self.slots.read().expect("registry lock poisoned");
        slots.get(handle.index).and_then(|slot| {
            if !slot.removed && slot.generation == handle.generation {
                Some(Arc::clone(&slot.display))
            } else {
                None
            }
        })
    }

    pub fn snapshot(&self, handle: DisplayRefHandle) -> Option<DisplayRefSnapshot> {
        self.resolve(handle).map(|d| DisplayRefSnapshot {
            dispno: d.dispno(),
            io_path: d.io_path().clone(),
            edid_id: d.edid_id().cloned(),
            mccs_version: d.mccs_version(),
            flags: d.flags(),
            real_display: d.real_display(),
        })
    }

    /// Mark a display `REMOVED` (§3 flag) without compacting the `Vec`,
    /// so existing handles resolve to `None` rather than a reused slot.
    pub fn remove(&self, handle: DisplayRefHandle) {
        let slots = self.slots.read().expect("registry lock poisoned");
        if let Some(slot) = slots.get(handle.index) {
            if slot.generation == handle.generation {
                slot.display.insert_flags(DisplayFlags::REMOVED);
            }
        }
        drop(slots);
        let mut slots = self.slots.write().expect("registry lock poisoned");
        if let Some(slot) = slots.get_mut(handle.index) {
            if slot.generation == handle.generation {
                slot.removed = true;
            }
        }
    }

    pub fn handles(&self) -> Vec<DisplayRefHandle> {
        let slots = self.slots.read().expect("registry lock poisoned");
        slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.removed)
            .map(|(index, slot)| DisplayRefHandle {
                index,
                generation: slot.generation,
            })
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handle_resolves_after_insert() {
        let registry = Registry::new();
        let handle = registry.insert(DisplayRef::new(
            IoPath::I2c { sysnum: 3 },
            TransportDetail::I2c {
                sysnum: 3,
                force_slave_address: true,
            },
            None,
        ));
        assert!(registry.resolve(handle).is_some());
    }

    #[test]
    fn handle_fails_after_remove() {
        let registry = Registry::new();
        let handle = registry.insert(DisplayRef::new(
            IoPath::I2c { sysnum: 3 },
            TransportDetail::I2c {
                sysnum: 3,
                force_slave_address: true,
            },
            None,
        ));
        registry.remove(handle);
        assert!(registry.resolve(handle).is_none());
    }

    #[test]
    fn exclusive_lock_denies_second_holder() {
        let registry = Registry::new();
        let handle = registry.insert(DisplayRef::new(
            IoPath::I2c { sysnum: 3 },
            TransportDetail::I2c {
                sysnum: 3,
                force_slave_address: true,
            },
            None,
        ));
        let display = registry.resolve(handle).unwrap();
        let guard1 = display.try_lock();
        assert!(guard1.is_some());
        assert!(display.try_lock().is_none());
        drop(guard1);
        assert!(display.try_lock().is_some());
    }
}
