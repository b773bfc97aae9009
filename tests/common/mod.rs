#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use lid_wake_enabler::{
    host::{DeviceTree, KextLoadNotifier, SymbolSolver, TreeAnchor},
    kext::{Framebuffer, TrackedKext},
    patcher::FramebufferPatch,
    Result,
};
use simplelog::*;

pub const IGPU_PATH: &str = "/AppleACPIPlatformExpert/PCI0@0/AppleACPIPCI/IGPU@2";

/// Where each fake kext is mapped.
pub fn image_base(framebuffer: Framebuffer) -> u64 {
    match framebuffer {
        Framebuffer::Azul => 0xffffff7f_80a00000,
        Framebuffer::Skylake => 0xffffff7f_81b00000,
        Framebuffer::KabyLake => 0xffffff7f_82c00000,
    }
}

/// Load index the fake loader assigns to each kext.
pub fn load_index(framebuffer: Framebuffer) -> usize {
    match framebuffer {
        Framebuffer::Azul => 11,
        Framebuffer::Skylake => 23,
        Framebuffer::KabyLake => 42,
    }
}

pub const ANCHOR_OFFSET: usize = 0x400;
pub const IMAGE_SIZE: usize = 0x4000;

pub fn init_logger() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// A device tree plus symbol table standing in for the kernel.
pub struct FakeHost {
    entries: Vec<String>,
    properties: HashMap<(String, String), u32>,
    symbols: HashMap<(usize, String), u64>,
    pub solve_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
    pub tree_lookups: AtomicUsize,
}

impl FakeHost {
    /// An IGPU with the given platform id and both framebuffer anchors resolvable.
    pub fn with_platform_id(platform_id: u32) -> Self {
        let mut host = Self::without_igpu();
        host.entries.push(IGPU_PATH.to_owned());
        host.properties.insert(
            (IGPU_PATH.to_owned(), "AAPL,ig-platform-id".to_owned()),
            platform_id,
        );
        host
    }

    /// An IGPU entry that lacks the platform id property.
    pub fn without_platform_id() -> Self {
        let mut host = Self::without_igpu();
        host.entries.push(IGPU_PATH.to_owned());
        host
    }

    /// PCI bridge present, but no IGPU below it.
    pub fn without_igpu() -> Self {
        let entries = [
            "/AppleACPIPlatformExpert",
            "/AppleACPIPlatformExpert/PCI0@0",
            "/AppleACPIPlatformExpert/PCI0@0/AppleACPIPCI",
            "/AppleACPIPlatformExpert/PCI0@0/AppleACPIPCI/GFX0@2",
        ];

        let mut symbols = HashMap::new();
        for framebuffer in [Framebuffer::Azul, Framebuffer::Skylake] {
            let patch = FramebufferPatch::for_framebuffer(framebuffer).unwrap();
            symbols.insert(
                (load_index(framebuffer), patch.anchor.to_owned()),
                image_base(framebuffer) + ANCHOR_OFFSET as u64,
            );
        }

        Self {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            properties: HashMap::new(),
            symbols,
            solve_calls: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            tree_lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_symbol(&mut self, index: usize, symbol: &str, address: Option<u64>) {
        let key = (index, symbol.to_owned());
        match address {
            Some(a) => self.symbols.insert(key, a),
            None => self.symbols.remove(&key),
        };
    }

    pub fn solve_calls(&self) -> usize {
        self.solve_calls.load(Ordering::Relaxed)
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::Relaxed)
    }
}

impl SymbolSolver for FakeHost {
    fn solve_symbol(&self, load_index: usize, symbol: &str) -> Option<u64> {
        self.solve_calls.fetch_add(1, Ordering::Relaxed);
        self.symbols.get(&(load_index, symbol.to_owned())).copied()
    }

    fn clear_error(&self) {
        self.clear_calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl DeviceTree for FakeHost {
    type Entry = String;

    fn find_entry_by_prefix(&self, anchor: TreeAnchor<'_, String>, prefix: &str) -> Option<String> {
        self.tree_lookups.fetch_add(1, Ordering::Relaxed);
        let parent = match anchor {
            TreeAnchor::Path(p) => p,
            TreeAnchor::Entry(e) => e.as_str(),
        };
        if !self.entries.iter().any(|e| e == parent) {
            return None;
        }

        self.entries
            .iter()
            .find(|e| {
                e.strip_prefix(parent)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .is_some_and(|name| !name.contains('/') && name.starts_with(prefix))
            })
            .cloned()
    }

    fn property_u32(&self, entry: &String, name: &str) -> Option<u32> {
        self.properties
            .get(&(entry.clone(), name.to_owned()))
            .copied()
    }
}

/// Loader that accepts or rejects registration, and hands out load indices on demand.
pub struct FakeLoader {
    pub reject: bool,
    pub registered: Vec<&'static str>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            reject: false,
            registered: Vec::new(),
        }
    }

    /// Marks `framebuffer` as loaded, as the host does right before calling back.
    pub fn load(kexts: &[TrackedKext], framebuffer: Framebuffer) -> usize {
        let index = load_index(framebuffer);
        kexts
            .iter()
            .find(|k| k.framebuffer == framebuffer)
            .unwrap()
            .set_load_index(index);
        index
    }
}

impl KextLoadNotifier for FakeLoader {
    fn on_kext_load(&mut self, kexts: &[TrackedKext]) -> Result<()> {
        if self.reject {
            return Err(lid_wake_enabler::Error::Registration("host error 1".into()));
        }
        self.registered.extend(kexts.iter().map(|k| k.id()));
        Ok(())
    }
}

/// Builds a fake framebuffer image with the platform id `key_distance` bytes past the anchor,
/// and `lid_byte` at the patch offset from it.
pub fn framebuffer_image(
    framebuffer: Framebuffer,
    platform_id: u32,
    key_distance: usize,
    lid_byte: u8,
) -> Vec<u8> {
    let mut bytes = vec![0u8; IMAGE_SIZE];
    let key_offset = ANCHOR_OFFSET + key_distance;
    bytes[key_offset..key_offset + 4].copy_from_slice(&platform_id.to_le_bytes());
    if let Some(patch) = FramebufferPatch::for_framebuffer(framebuffer) {
        bytes[key_offset + patch.offset] = lid_byte;
    }
    bytes
}

/// Offset of the lid wake byte in an image made by [`framebuffer_image`].
pub fn lid_byte_offset(framebuffer: Framebuffer, key_distance: usize) -> usize {
    ANCHOR_OFFSET + key_distance + FramebufferPatch::for_framebuffer(framebuffer).unwrap().offset
}
