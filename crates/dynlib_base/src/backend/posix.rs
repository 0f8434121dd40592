use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::trace;

use super::traits::{Backend, RawModule, RawSymbol};

std::thread_local! {
    // Failures detected before reaching the loader, e.g. a path libc cannot represent.
    static LOCAL_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_local_error(message: String) {
    LOCAL_ERROR.with(|cell| *cell.borrow_mut() = Some(message));
}

fn take_local_error() -> Option<String> {
    LOCAL_ERROR.with(|cell| cell.borrow_mut().take())
}

/// Drains both our own pending message and the loader's, so the next diagnostic belongs to
/// the next call.
fn clear_errors() {
    take_local_error();
    unsafe {
        libc::dlerror();
    }
}

/// Loader backend for unix targets, built on `dlopen`/`dlsym`/`dlclose`/`dlerror`.
///
/// Modules are opened with `RTLD_LAZY`. `dlerror` state is thread-local, so
/// [`Backend::last_error`] must be called on the thread that saw the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl PosixBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for PosixBackend {
    fn open(&self, path: &Path) -> Option<RawModule> {
        clear_errors();
        let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
            set_local_error(format!(
                "{}: path contains an interior nul byte",
                path.display()
            ));
            return None;
        };
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        trace!(path = %path.display(), null = handle.is_null(), "dlopen");
        RawModule::new(handle)
    }

    fn close(&self, module: RawModule) -> bool {
        clear_errors();
        let rc = unsafe { libc::dlclose(module.as_ptr()) };
        trace!(rc, "dlclose");
        rc == 0
    }

    fn symbol(&self, module: RawModule, name: &CStr) -> Option<RawSymbol> {
        clear_errors();
        let address = unsafe { libc::dlsym(module.as_ptr(), name.as_ptr()) };
        RawSymbol::new(address)
    }

    fn last_error(&self) -> String {
        if let Some(message) = take_local_error() {
            return message;
        }
        let message = unsafe { libc::dlerror() };
        if message.is_null() {
            return "unknown dynamic loader error".to_string();
        }
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}
