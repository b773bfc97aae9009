//! Services the patcher borrows from the host's kernel patcher and IORegistry.

use crate::{error::Result, kext::TrackedKext};

/// Registers interest in kexts so the host calls back once each of them is loaded.
pub trait KextLoadNotifier {
    /// Asks the host to report when any of `kexts` loads. The host assigns each kext its load
    /// index through [`TrackedKext::set_load_index`] once it has been observed.
    fn on_kext_load(&mut self, kexts: &[TrackedKext]) -> Result<()>;
}

/// Resolves exported symbols inside a loaded kext.
pub trait SymbolSolver {
    fn solve_symbol(&self, load_index: usize, symbol: &str) -> Option<u64>;

    /// Resets the host's last error indicator. Called after every resolution attempt.
    fn clear_error(&self);
}

/// Where a device tree lookup starts from.
#[derive(Debug, Clone, Copy)]
pub enum TreeAnchor<'a, E> {
    /// An absolute path in the service plane.
    Path(&'a str),
    /// A previously found entry.
    Entry(&'a E),
}

/// Read-only access to the service plane of the device tree.
pub trait DeviceTree {
    type Entry;

    /// Finds the first child of `anchor` whose name starts with `prefix`.
    fn find_entry_by_prefix(
        &self,
        anchor: TreeAnchor<'_, Self::Entry>,
        prefix: &str,
    ) -> Option<Self::Entry>;

    /// Reads a 32-bit data property of `entry`.
    fn property_u32(&self, entry: &Self::Entry, name: &str) -> Option<u32>;
}
