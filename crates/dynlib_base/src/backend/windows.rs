use std::cell::RefCell;
use std::ffi::{CStr, c_void};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use tracing::trace;
use windows_sys::Win32::Foundation::{FreeLibrary, GetLastError};
use windows_sys::Win32::System::Diagnostics::Debug::{
    FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW,
};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::traits::{Backend, RawModule, RawSymbol};

std::thread_local! {
    static LOCAL_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_local_error(message: String) {
    LOCAL_ERROR.with(|cell| *cell.borrow_mut() = Some(message));
}

fn take_local_error() -> Option<String> {
    LOCAL_ERROR.with(|cell| cell.borrow_mut().take())
}

/// Records the thread's Win32 error before anything else can overwrite it.
fn capture_last_error() {
    set_local_error(describe_error(unsafe { GetLastError() }));
}

/// Renders a Win32 error code with `FormatMessageW`.
fn describe_error(code: u32) -> String {
    let mut buffer = [0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            std::ptr::null(),
            code,
            0,
            buffer.as_mut_ptr(),
            buffer.len() as u32,
            std::ptr::null(),
        )
    };
    if len == 0 {
        return format!("Windows error {}", code);
    }
    String::from_utf16_lossy(&buffer[..len as usize])
        .trim_end()
        .to_string()
}

/// Loader backend for Windows, built on `LoadLibraryW`/`GetProcAddress`/`FreeLibrary`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for WindowsBackend {
    fn open(&self, path: &Path) -> Option<RawModule> {
        take_local_error();
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        if wide[..wide.len() - 1].contains(&0) {
            set_local_error(format!(
                "{}: path contains an interior nul character",
                path.display()
            ));
            return None;
        }
        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            capture_last_error();
        }
        trace!(path = %path.display(), null = handle.is_null(), "LoadLibraryW");
        RawModule::new(handle)
    }

    fn close(&self, module: RawModule) -> bool {
        take_local_error();
        let ok = unsafe { FreeLibrary(module.as_ptr()) } != 0;
        if !ok {
            capture_last_error();
        }
        trace!(ok, "FreeLibrary");
        ok
    }

    fn symbol(&self, module: RawModule, name: &CStr) -> Option<RawSymbol> {
        take_local_error();
        let address = unsafe { GetProcAddress(module.as_ptr(), name.as_ptr().cast()) };
        if address.is_none() {
            capture_last_error();
        }
        address.and_then(|function| RawSymbol::new(function as *mut c_void))
    }

    fn last_error(&self) -> String {
        if let Some(message) = take_local_error() {
            return message;
        }
        describe_error(unsafe { GetLastError() })
    }
}
