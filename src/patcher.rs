//! Applies the lid wake patch to whichever framebuffer kext loads first.
//!
//! Each supported framebuffer keeps a per-platform connector table close to an exported
//! symbol. We locate the table for our `ig-platform-id` by scanning forward from that symbol,
//! then rewrite a single flag byte at a fixed offset from the id. This lets the internal
//! panel come back after the lid is opened.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    OnceLock,
};

use crate::{
    error::{Error, Result},
    host::{DeviceTree, KextLoadNotifier, SymbolSolver},
    image::KextImage,
    kext::{Framebuffer, TrackedKext},
    platform::{Fixability, Platform},
    scan::{self, PAGE_SIZE},
};

/// Where the lid wake byte of a framebuffer lives, relative to the platform id we scan for.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferPatch {
    pub framebuffer: Framebuffer,
    /// Symbol the scan starts from.
    pub anchor: &'static str,
    /// Distance from the start of the matched platform id to the byte to rewrite.
    pub offset: usize,
}

pub const FRAMEBUFFER_PATCHES: &[FramebufferPatch] = &[
    FramebufferPatch {
        framebuffer: Framebuffer::Azul,
        anchor: "_ltDriveTable",
        offset: 88,
    },
    FramebufferPatch {
        framebuffer: Framebuffer::Skylake,
        anchor: "__ZZN11BanksiaTcon10processCmdE22kFBControllerCommand_tPmmS1_S1_E14tconFeatureSet",
        offset: 97,
    },
];

impl FramebufferPatch {
    pub fn for_framebuffer(framebuffer: Framebuffer) -> Option<&'static FramebufferPatch> {
        FRAMEBUFFER_PATCHES
            .iter()
            .find(|p| p.framebuffer == framebuffer)
    }
}

/// What a single kext load notification ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStatus {
    /// The lid wake byte at `offset` was rewritten to `value`.
    Patched { offset: usize, value: u8 },
    /// The byte already held the corrected value. Nothing was written.
    AlreadyPatched,
    /// This machine's platform id has no known fix.
    Unfixable,
    /// A previous notification already applied the patch.
    Done,
    /// The load index doesn't belong to any tracked kext.
    NotTracked,
    /// The kext is tracked but has no patch defined.
    NoPatch,
    Failed(Error),
}

/// Process wide patcher state.
///
/// The platform is detected on the first notification and cached. The patched flag only
/// ever goes from `false` to `true`, and is claimed before the write so that at most one
/// kext is ever modified.
#[derive(Debug)]
pub struct PatchContext {
    kexts: [TrackedKext; 3],
    platform: OnceLock<Platform>,
    patched: AtomicBool,
}

impl Default for PatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchContext {
    pub fn new() -> Self {
        Self {
            kexts: TrackedKext::framebuffers(),
            platform: OnceLock::new(),
            patched: AtomicBool::new(false),
        }
    }

    pub fn kexts(&self) -> &[TrackedKext] {
        &self.kexts
    }

    /// Asks the host to call [`PatchContext::on_kext_loaded`] for every tracked kext.
    pub fn register<N: KextLoadNotifier>(&self, notifier: &mut N) -> Result<()> {
        notifier
            .on_kext_load(&self.kexts)
            .inspect_err(|e| log::error!("{e}"))
    }

    /// The detected platform, once the first kext has loaded.
    pub fn platform(&self) -> Option<&Platform> {
        self.platform.get()
    }

    pub fn is_patched(&self) -> bool {
        self.patched.load(Ordering::Acquire)
    }

    /// Handles the load of the kext with host load index `index`, mapped as `image`.
    ///
    /// Failures are logged and only abort this attempt. Another framebuffer loading later
    /// still gets its turn.
    pub fn on_kext_loaded<H>(
        &self,
        host: &H,
        index: usize,
        image: &mut KextImage<'_>,
    ) -> PatchStatus
    where
        H: SymbolSolver + DeviceTree,
    {
        let platform = *self.platform.get_or_init(|| Platform::detect(host));

        let Fixability::Fixable(correction) = platform.fixability else {
            return PatchStatus::Unfixable;
        };
        if self.is_patched() {
            return PatchStatus::Done;
        }

        let Some(kext) = self.kexts.iter().find(|k| k.load_index() == Some(index)) else {
            log::debug!("load index {index} is not a tracked kext");
            return PatchStatus::NotTracked;
        };
        log::info!("found {}", kext.id());

        let framebuffer = kext.framebuffer;
        let (Some(patch), Some(value)) = (
            FramebufferPatch::for_framebuffer(framebuffer),
            correction.byte_for(framebuffer),
        ) else {
            log::debug!("no lid wake patch for {}", kext.id());
            return PatchStatus::NoPatch;
        };

        self.apply(host, index, image, patch, &platform, value)
            .unwrap_or_else(|e| {
                log::warn!("{e}");
                PatchStatus::Failed(e)
            })
    }

    fn apply<S: SymbolSolver>(
        &self,
        solver: &S,
        index: usize,
        image: &mut KextImage<'_>,
        patch: &FramebufferPatch,
        platform: &Platform,
        value: u8,
    ) -> Result<PatchStatus> {
        let symbol = patch.anchor;
        let address = solver.solve_symbol(index, symbol);
        solver.clear_error();

        let address = address.ok_or(Error::SymbolNotFound { symbol })?;
        log::info!("obtained {symbol}");

        let anchor = image
            .offset_of(address)
            .ok_or(Error::SymbolOutsideImage { symbol, addr: address })?;

        let key = platform.search_key.bytes();
        let found = scan::find_near(image.bytes(), anchor, key, PAGE_SIZE).ok_or(
            Error::PlatformIdNotFound {
                kext: patch.framebuffer.bundle_id(),
                symbol,
            },
        )?;
        log::debug!(
            "found platform-id (0x{:08x}) at framebuffer info data segment",
            platform.id
        );

        let target = found + patch.offset;
        log::debug!("{:02x?}", image.peek(target, 5));

        if image.read_byte(target)? == value {
            // Kext cache was likely patched already
            log::info!(
                "already enabled internal display after sleep for ig-platform-id: 0x{:08x}",
                platform.id
            );
            return Ok(PatchStatus::AlreadyPatched);
        }

        if self
            .patched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(PatchStatus::Done);
        }

        log::debug!("writing 0x{value:02x} at image offset 0x{target:x}");
        image.write_byte(target, value)?;
        log::info!(
            "enable internal display after sleep for ig-platform-id: 0x{:08x}",
            platform.id
        );

        Ok(PatchStatus::Patched {
            offset: target,
            value,
        })
    }
}
