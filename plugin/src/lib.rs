extern crate lid_wake_enabler;

use lid_wake_enabler::ffi::{self, HostApi};

#[cfg(feature = "debug-log")]
const LOG_LEVEL: simplelog::LevelFilter = simplelog::LevelFilter::Trace;
#[cfg(not(feature = "debug-log"))]
const LOG_LEVEL: simplelog::LevelFilter = simplelog::LevelFilter::Info;

/// Entry point called by the host once the kernel patcher is ready.
///
/// Returns `false` if the kext load callback could not be registered, in which case nothing
/// will ever be patched.
///
/// # Safety
/// `api` must point to a [`HostApi`] whose functions stay valid for the process lifetime.
#[no_mangle]
pub unsafe extern "C" fn lid_wake_plugin_start(api: *const HostApi) -> bool {
    // Another logger may already be installed by the host; keep using it then
    let _ = simplelog::TermLogger::init(
        LOG_LEVEL,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stdout,
        simplelog::ColorChoice::Auto,
    );

    let Some(api) = (unsafe { api.as_ref() }) else {
        log::error!("no host API provided");
        return false;
    };

    match unsafe { ffi::start(*api) } {
        Ok(()) => {
            log::info!("lid wake enabler started");
            true
        }
        Err(e) => {
            log::error!("{e}");
            false
        }
    }
}
