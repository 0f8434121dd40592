use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::{Backend, RawModule, RawSymbol};

/* 📖 # How does MockBackend model the loader?

MockBackend keeps a registry of fake libraries keyed by path. Each library maps symbol names
to addresses supplied by the test, usually real `extern "C"` functions, so resolved symbols
can be called like ones from a real module.

Every successful open hands out a distinct handle that stays live until it is closed. Closing
an unknown or already released handle fails with "invalid handle", the same way a real
double release would be reported. Tests use `live_handles` to check that nothing leaked and
nothing was released twice.
*/

/// In-memory loader for tests.
///
/// Clones share state, so a test can keep one copy for inspection and hand another to a
/// `BackendHandle`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use dynlib_base::{Backend, MockBackend};
///
/// extern "C" fn answer() -> i32 {
///     42
/// }
///
/// let mock = MockBackend::new();
/// mock.add_symbol("libanswer.so", "answer", answer as *const ());
/// let module = mock.open(Path::new("libanswer.so")).unwrap();
/// assert_eq!(mock.live_handles(), 1);
/// assert!(mock.close(module));
/// assert_eq!(mock.live_handles(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    libraries: HashMap<PathBuf, MockLibrary>,
    live: HashMap<usize, PathBuf>,
    next_id: usize,
    open_calls: usize,
    last_error: String,
}

#[derive(Debug, Default)]
struct MockLibrary {
    symbols: HashMap<String, RawSymbol>,
    fail_close: bool,
}

impl MockState {
    fn fail<T>(&mut self, message: String) -> Option<T> {
        self.last_error = message;
        None
    }
}

impl MockBackend {
    /// Create a new MockBackend with no libraries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a library at `path` without any symbols.
    pub fn add_library(&self, path: impl Into<PathBuf>) {
        self.state.lock().libraries.entry(path.into()).or_default();
    }

    /// Registers `name` in the library at `path`, creating the library if needed.
    ///
    /// Null addresses are ignored, as a loader never resolves to null.
    pub fn add_symbol(&self, path: impl Into<PathBuf>, name: &str, address: *const ()) {
        let mut state = self.state.lock();
        let library = state.libraries.entry(path.into()).or_default();
        if let Some(symbol) = RawSymbol::new(address as *mut c_void) {
            library.symbols.insert(name.to_string(), symbol);
        }
    }

    /// Removes the library at `path`, so later opens of it fail.
    /// Handles that are already open stay live.
    pub fn remove_library(&self, path: impl AsRef<Path>) {
        self.state.lock().libraries.remove(path.as_ref());
    }

    /// Makes every release of the library at `path` fail.
    pub fn set_fail_close(&self, path: impl AsRef<Path>, fail: bool) {
        if let Some(library) = self.state.lock().libraries.get_mut(path.as_ref()) {
            library.fail_close = fail;
        }
    }

    /// Number of handles opened and not yet successfully closed.
    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of open requests received, successful or not.
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }
}

impl Backend for MockBackend {
    fn open(&self, path: &Path) -> Option<RawModule> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if !state.libraries.contains_key(path) {
            return state.fail(format!(
                "{}: cannot open shared object file: No such file or directory",
                path.display()
            ));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, path.to_path_buf());
        RawModule::new(std::ptr::without_provenance_mut(id))
    }

    fn close(&self, module: RawModule) -> bool {
        let mut state = self.state.lock();
        let id = module.as_ptr().addr();
        let Some(path) = state.live.get(&id).cloned() else {
            state.last_error = "invalid handle".to_string();
            return false;
        };
        if state
            .libraries
            .get(&path)
            .is_some_and(|library| library.fail_close)
        {
            state.last_error = format!("{}: failed to unload module", path.display());
            return false;
        }
        state.live.remove(&id);
        true
    }

    fn symbol(&self, module: RawModule, name: &CStr) -> Option<RawSymbol> {
        let mut state = self.state.lock();
        let id = module.as_ptr().addr();
        let Some(path) = state.live.get(&id).cloned() else {
            return state.fail("invalid handle".to_string());
        };
        let found = state
            .libraries
            .get(&path)
            .and_then(|library| library.symbols.get(name.to_string_lossy().as_ref()))
            .copied();
        match found {
            Some(symbol) => Some(symbol),
            None => state.fail(format!(
                "{}: undefined symbol: {}",
                path.display(),
                name.to_string_lossy()
            )),
        }
    }

    fn last_error(&self) -> String {
        self.state.lock().last_error.clone()
    }
}
