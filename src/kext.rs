//! The framebuffer kexts we watch for.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Intel framebuffer generations whose kexts are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framebuffer {
    /// Haswell, `AppleIntelFramebufferAzul`.
    Azul,
    /// Skylake, `AppleIntelSKLGraphicsFramebuffer`.
    Skylake,
    /// Kaby Lake, `AppleIntelKBLGraphicsFramebuffer`. Watched, but never patched.
    KabyLake,
}

impl Framebuffer {
    pub const ALL: [Framebuffer; 3] = [Self::Azul, Self::Skylake, Self::KabyLake];

    pub const fn bundle_id(self) -> &'static str {
        match self {
            Self::Azul => "com.apple.driver.AppleIntelFramebufferAzul",
            Self::Skylake => "com.apple.driver.AppleIntelSKLGraphicsFramebuffer",
            Self::KabyLake => "com.apple.driver.AppleIntelKBLGraphicsFramebuffer",
        }
    }

    pub const fn paths(self) -> &'static [&'static str] {
        match self {
            Self::Azul => &[
                "/System/Library/Extensions/AppleIntelFramebufferAzul.kext/Contents/MacOS/AppleIntelFramebufferAzul",
            ],
            Self::Skylake => &[
                "/System/Library/Extensions/AppleIntelSKLGraphicsFramebuffer.kext/Contents/MacOS/AppleIntelSKLGraphicsFramebuffer",
            ],
            Self::KabyLake => &[
                "/System/Library/Extensions/AppleIntelKBLGraphicsFramebuffer.kext/Contents/MacOS/AppleIntelKBLGraphicsFramebuffer",
            ],
        }
    }
}

/// A kext registered with the host loader, plus the load index the host gave it.
#[derive(Debug)]
pub struct TrackedKext {
    pub framebuffer: Framebuffer,
    load_index: AtomicUsize,
}

impl TrackedKext {
    const UNLOADED: usize = usize::MAX;

    pub const fn new(framebuffer: Framebuffer) -> Self {
        Self {
            framebuffer,
            load_index: AtomicUsize::new(Self::UNLOADED),
        }
    }

    /// One entry per [`Framebuffer`], none of them loaded yet.
    pub fn framebuffers() -> [TrackedKext; 3] {
        Framebuffer::ALL.map(Self::new)
    }

    pub fn id(&self) -> &'static str {
        self.framebuffer.bundle_id()
    }

    pub fn paths(&self) -> &'static [&'static str] {
        self.framebuffer.paths()
    }

    /// We always want a callback once the kext is loaded.
    pub fn notify_on_load(&self) -> bool {
        true
    }

    pub fn load_index(&self) -> Option<usize> {
        match self.load_index.load(Ordering::Acquire) {
            Self::UNLOADED => None,
            index => Some(index),
        }
    }

    pub fn set_load_index(&self, index: usize) {
        self.load_index.store(index, Ordering::Release);
    }
}
