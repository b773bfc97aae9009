//! Integrated GPU platform detection and classification.
//!
//! The framebuffer kexts keep one connector table per `ig-platform-id`, keyed by the id in
//! little-endian form. Only a handful of those tables carry the broken lid wake flag.

use std::fmt;

use crate::{
    host::{DeviceTree, TreeAnchor},
    kext::Framebuffer,
};

/// Device tree path under which the PCI root bridge lives.
pub const PLATFORM_EXPERT: &str = "/AppleACPIPlatformExpert";
/// Name prefixes leading from [`PLATFORM_EXPERT`] down to the integrated GPU.
pub const IGPU_TREE: [&str; 3] = ["PCI", "AppleACPIPCI", "IGPU"];
pub const PLATFORM_ID_PROPERTY: &str = "AAPL,ig-platform-id";

/// Replacement lid wake byte for each framebuffer, for one fixable platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub azul: u8,
    pub skylake: u8,
}

impl Correction {
    const COMMON: Self = Self {
        azul: 0x1e,
        skylake: 0x0f,
    };

    /// The byte to write for `framebuffer`, if it has a patch at all.
    pub fn byte_for(&self, framebuffer: Framebuffer) -> Option<u8> {
        match framebuffer {
            Framebuffer::Azul => Some(self.azul),
            Framebuffer::Skylake => Some(self.skylake),
            Framebuffer::KabyLake => None,
        }
    }
}

/// Every platform id we know how to fix.
pub const FIXABLE_PLATFORMS: &[(u32, Correction)] = &[
    (0x19260004, Correction::COMMON),
    (0x0a26000a, Correction::COMMON),
    (
        0x0a2e0008,
        Correction {
            azul: 0x1f,
            ..Correction::COMMON
        },
    ),
    (0x0a2e000a, Correction::COMMON),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixability {
    Fixable(Correction),
    Unfixable,
}

impl Fixability {
    pub fn of(platform_id: u32) -> Self {
        FIXABLE_PLATFORMS
            .iter()
            .find(|(id, _)| *id == platform_id)
            .map_or(Self::Unfixable, |&(_, correction)| {
                Self::Fixable(correction)
            })
    }

    pub fn is_fixable(&self) -> bool {
        matches!(self, Self::Fixable(_))
    }
}

/// The platform id as it is laid out in the framebuffer's data tables.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SearchKey([u8; 4]);

impl SearchKey {
    pub fn from_platform_id(platform_id: u32) -> Self {
        Self(platform_id.to_le_bytes())
    }

    pub fn platform_id(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchKey({:02x?})", self.0)
    }
}

/// The classified platform of this machine. Computed once, never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub id: u32,
    pub search_key: SearchKey,
    pub fixability: Fixability,
}

impl Platform {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            search_key: SearchKey::from_platform_id(id),
            fixability: Fixability::of(id),
        }
    }

    /// Reads the platform id from the device tree and classifies it.
    pub fn detect<T: DeviceTree>(tree: &T) -> Self {
        let platform = Self::new(read_platform_id(tree));
        match platform.fixability {
            Fixability::Fixable(_) => log::debug!(
                "reverse order of ig-platform-id: {:02x?}",
                platform.search_key.bytes()
            ),
            Fixability::Unfixable => log::info!("0x{:08x} is not fixable, abort.", platform.id),
        }
        platform
    }
}

/// Walks down to the IGPU entry and reads its `AAPL,ig-platform-id`.
///
/// Yields 0 when the entry or the property is missing. Old platforms don't set the property.
pub fn read_platform_id<T: DeviceTree>(tree: &T) -> u32 {
    let mut entry: Option<T::Entry> = None;
    for (depth, prefix) in IGPU_TREE.into_iter().enumerate() {
        let anchor = match &entry {
            Some(parent) => TreeAnchor::Entry(parent),
            None if depth == 0 => TreeAnchor::Path(PLATFORM_EXPERT),
            None => break,
        };
        entry = tree.find_entry_by_prefix(anchor, prefix);
    }

    let Some(igpu) = entry else {
        log::debug!("failed to find IGPU ig-platform-id");
        return 0;
    };

    match tree.property_u32(&igpu, PLATFORM_ID_PROPERTY) {
        Some(id) => {
            log::debug!("found IGPU with ig-platform-id 0x{id:08x}");
            id
        }
        None => {
            log::info!("found IGPU with missing ig-platform-id, assuming old");
            0
        }
    }
}
