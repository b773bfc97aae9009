//! C ABI bridge between a kernel patcher host and [`PatchContext`].

use std::{
    ffi::{c_char, c_void, CString},
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    },
};

use crate::{
    error::{Error, Result},
    host::{DeviceTree, KextLoadNotifier, SymbolSolver, TreeAnchor},
    image::KextImage,
    kext::TrackedKext,
    patcher::PatchContext,
};

/// Invoked by the host once a tracked kext is loaded.
pub type KextLoadCallback = unsafe extern "C" fn(
    user: *mut c_void,
    patcher: *mut c_void,
    index: usize,
    address: u64,
    size: usize,
);

/// A tracked kext as handed to the host. The host writes `load_index` when it loads the kext.
#[derive(Debug)]
#[repr(C)]
pub struct KextInfo {
    pub id: *const c_char,
    pub paths: *const *const c_char,
    pub path_count: usize,
    pub notify_on_load: bool,
    pub load_index: AtomicUsize,
}

impl KextInfo {
    pub const UNLOADED: usize = usize::MAX;
}

/// Function table provided by the host.
///
/// `context` is passed back to the registration and device tree functions. Symbol functions
/// receive the patcher handle the host gave to the load callback instead.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct HostApi {
    pub context: *mut c_void,
    /// Returns 0 on success.
    pub on_kext_load: unsafe extern "C" fn(
        context: *mut c_void,
        kexts: *mut KextInfo,
        count: usize,
        callback: KextLoadCallback,
        user: *mut c_void,
    ) -> i32,
    /// Returns 0 when the symbol cannot be resolved.
    pub solve_symbol:
        unsafe extern "C" fn(patcher: *mut c_void, index: usize, symbol: *const c_char) -> u64,
    pub clear_error: unsafe extern "C" fn(patcher: *mut c_void),
    /// Looks up `prefix` below `parent`, or below the entry at `path` when `parent` is null.
    pub find_entry_by_prefix: unsafe extern "C" fn(
        context: *mut c_void,
        parent: *mut c_void,
        path: *const c_char,
        prefix: *const c_char,
    ) -> *mut c_void,
    pub get_property_u32: unsafe extern "C" fn(
        context: *mut c_void,
        entry: *mut c_void,
        name: *const c_char,
        value: *mut u32,
    ) -> bool,
}

/// Owns the C strings and pointer arrays behind a [`KextInfo`] list.
struct KextInfoList {
    _strings: Vec<CString>,
    _paths: Vec<Box<[*const c_char]>>,
    infos: Box<[KextInfo]>,
}

impl KextInfoList {
    fn new(kexts: &[TrackedKext]) -> Result<Self> {
        let to_c = |s: &str| CString::new(s).map_err(|e| Error::Registration(e.to_string()));

        let mut strings = Vec::new();
        let mut paths = Vec::new();
        let mut infos = Vec::with_capacity(kexts.len());
        for kext in kexts {
            let id = to_c(kext.id())?;
            let kext_paths = kext
                .paths()
                .iter()
                .map(|&p| to_c(p))
                .collect::<Result<Vec<_>>>()?;
            let path_ptrs: Box<[_]> = kext_paths.iter().map(|p| p.as_ptr()).collect();

            infos.push(KextInfo {
                id: id.as_ptr(),
                paths: path_ptrs.as_ptr(),
                path_count: path_ptrs.len(),
                notify_on_load: kext.notify_on_load(),
                load_index: AtomicUsize::new(KextInfo::UNLOADED),
            });
            strings.push(id);
            strings.extend(kext_paths);
            paths.push(path_ptrs);
        }

        Ok(Self {
            _strings: strings,
            _paths: paths,
            infos: infos.into_boxed_slice(),
        })
    }
}

struct Plugin {
    api: HostApi,
    ctx: PatchContext,
    kexts: OnceLock<KextInfoList>,
}

// The host API is callable from any thread, and the kext list is only written through atomics.
unsafe impl Send for Plugin {}
unsafe impl Sync for Plugin {}

static PLUGIN: OnceLock<Plugin> = OnceLock::new();

struct Registrar<'a> {
    plugin: &'a Plugin,
}

impl KextLoadNotifier for Registrar<'_> {
    fn on_kext_load(&mut self, kexts: &[TrackedKext]) -> Result<()> {
        let list = KextInfoList::new(kexts)?;
        let list = self.plugin.kexts.get_or_init(|| list);

        let api = &self.plugin.api;
        let user = ptr::from_ref(self.plugin).cast_mut().cast();
        let error = unsafe {
            (api.on_kext_load)(
                api.context,
                list.infos.as_ptr().cast_mut(),
                list.infos.len(),
                kext_loaded,
                user,
            )
        };

        match error {
            0 => Ok(()),
            e => Err(Error::Registration(format!("host error {e}"))),
        }
    }
}

/// Host services available while handling one load notification.
struct FfiHost<'a> {
    api: &'a HostApi,
    patcher: *mut c_void,
}

impl SymbolSolver for FfiHost<'_> {
    fn solve_symbol(&self, load_index: usize, symbol: &str) -> Option<u64> {
        let symbol = CString::new(symbol).ok()?;
        let address =
            unsafe { (self.api.solve_symbol)(self.patcher, load_index, symbol.as_ptr()) };
        (address != 0).then_some(address)
    }

    fn clear_error(&self) {
        unsafe { (self.api.clear_error)(self.patcher) }
    }
}

impl DeviceTree for FfiHost<'_> {
    type Entry = NonNull<c_void>;

    fn find_entry_by_prefix(
        &self,
        anchor: TreeAnchor<'_, Self::Entry>,
        prefix: &str,
    ) -> Option<Self::Entry> {
        let prefix = CString::new(prefix).ok()?;
        let entry = match anchor {
            TreeAnchor::Path(path) => {
                let path = CString::new(path).ok()?;
                unsafe {
                    (self.api.find_entry_by_prefix)(
                        self.api.context,
                        ptr::null_mut(),
                        path.as_ptr(),
                        prefix.as_ptr(),
                    )
                }
            }
            TreeAnchor::Entry(parent) => unsafe {
                (self.api.find_entry_by_prefix)(
                    self.api.context,
                    parent.as_ptr(),
                    ptr::null(),
                    prefix.as_ptr(),
                )
            },
        };
        NonNull::new(entry)
    }

    fn property_u32(&self, entry: &Self::Entry, name: &str) -> Option<u32> {
        let name = CString::new(name).ok()?;
        let mut value = 0u32;
        let found = unsafe {
            (self.api.get_property_u32)(self.api.context, entry.as_ptr(), name.as_ptr(), &mut value)
        };
        found.then_some(value)
    }
}

unsafe extern "C" fn kext_loaded(
    user: *mut c_void,
    patcher: *mut c_void,
    index: usize,
    address: u64,
    size: usize,
) {
    let plugin = unsafe { &*user.cast_const().cast::<Plugin>() };

    // Pick up the load indices the host has written so far
    if let Some(list) = plugin.kexts.get() {
        for (info, kext) in list.infos.iter().zip(plugin.ctx.kexts()) {
            match info.load_index.load(Ordering::Acquire) {
                KextInfo::UNLOADED => {}
                i => kext.set_load_index(i),
            }
        }
    }

    if address == 0 {
        log::warn!("load index {index} reported without an image address");
        return;
    }

    let host = FfiHost {
        api: &plugin.api,
        patcher,
    };
    let mut image = unsafe { KextImage::from_raw(address, size) };
    let status = plugin.ctx.on_kext_loaded(&host, index, &mut image);
    log::trace!("load index {index} handled: {status:?}");
}

/// Registers the framebuffer load callback with the host.
///
/// # Safety
/// Every function in `api` must be safe to call with the documented arguments for the rest
/// of the process lifetime, and images reported to the load callback must stay mapped and
/// writable while the callback runs.
pub unsafe fn start(api: HostApi) -> Result<()> {
    let plugin = Plugin {
        api,
        ctx: PatchContext::new(),
        kexts: OnceLock::new(),
    };
    PLUGIN
        .set(plugin)
        .map_err(|_| Error::Registration("already started".into()))?;

    let plugin = PLUGIN
        .get()
        .ok_or_else(|| Error::Registration("plugin state unavailable".into()))?;
    plugin.ctx.register(&mut Registrar { plugin })
}
