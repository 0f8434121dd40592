use std::ffi::c_void;
use std::fmt;
use std::path::PathBuf;

use dynlib::Library;
use dynlib_base::{BackendHandle, DynlibError};
use tracing::{debug, instrument, warn};

use crate::config::{Config, LibraryConfig};

/// Result of probing every library listed in a [`Config`].
#[derive(Debug)]
pub struct ProbeReport {
    pub libraries: Vec<LibraryReport>,
}

#[derive(Debug)]
pub struct LibraryReport {
    /// The path handed to the loader.
    pub path: PathBuf,
    pub outcome: LibraryOutcome,
}

#[derive(Debug)]
pub enum LibraryOutcome {
    /// The library could not be opened.
    Failed(Box<DynlibError>),
    /// The library opened; symbols are split by whether they resolved.
    Opened {
        resolved: Vec<String>,
        missing: Vec<(String, Box<DynlibError>)>,
    },
}

impl ProbeReport {
    /// True when every library opened and every listed symbol resolved.
    pub fn is_success(&self) -> bool {
        self.libraries.iter().all(|report| {
            matches!(&report.outcome, LibraryOutcome::Opened { missing, .. } if missing.is_empty())
        })
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.libraries {
            let path = report.path.display();
            match &report.outcome {
                LibraryOutcome::Failed(error) => writeln!(f, "FAIL {}: {}", path, error)?,
                LibraryOutcome::Opened { resolved, missing } => {
                    let status = if missing.is_empty() { "ok  " } else { "FAIL" };
                    writeln!(
                        f,
                        "{} {} ({}/{} symbols)",
                        status,
                        path,
                        resolved.len(),
                        resolved.len() + missing.len()
                    )?;
                    for (name, error) in missing {
                        writeln!(f, "     missing {}: {}", name, error)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Opens each configured library through `backend` and checks its symbols resolve.
///
/// Resolved symbols are never called; only their presence is checked.
#[instrument(skip_all, fields(libraries = config.libraries.len()))]
pub fn probe(config: &Config, backend: &BackendHandle) -> ProbeReport {
    let libraries = config
        .libraries
        .iter()
        .map(|entry| probe_library(entry, backend))
        .collect();
    ProbeReport { libraries }
}

fn probe_library(entry: &LibraryConfig, backend: &BackendHandle) -> LibraryReport {
    let path = entry.resolved_path();
    let library = match Library::load_with(backend.clone(), &path) {
        Ok(library) => library,
        Err(error) => {
            warn!(path = %path.display(), %error, "library failed to open");
            return LibraryReport {
                path,
                outcome: LibraryOutcome::Failed(error),
            };
        }
    };

    let mut resolved = Vec::new();
    let mut missing = Vec::new();
    for name in &entry.symbols {
        // Only the address is inspected; the symbol is never dereferenced or called.
        match unsafe { library.get::<*mut c_void>(name) } {
            Ok(_) => resolved.push(name.clone()),
            Err(error) => missing.push((name.clone(), error)),
        }
    }
    debug!(
        path = %path.display(),
        resolved = resolved.len(),
        missing = missing.len(),
        "library probed"
    );

    LibraryReport {
        path,
        outcome: LibraryOutcome::Opened { resolved, missing },
    }
}
