/* 📖 # How does dynlib-probe work?

dynlib-probe reads a manifest (`dynlib.toml` in the current directory, or the path given as
the first argument), opens every listed library with the native loader and checks that the
listed symbols resolve. It never calls a resolved symbol.

Exit codes:
- 0: every library opened and every symbol resolved
- 1: the manifest could not be loaded, or anything failed to open or resolve
*/

use std::env;
use std::path::PathBuf;
use std::process;

use dynlib_base::BackendHandle;
use dynlib_base::tracing::init_tracing;
use dynlib_cli::{load_config, probe};

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("Warning: {}", e);
    }

    let config_path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dynlib.toml"));

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if config.libraries.is_empty() {
        println!("No libraries listed in {}.", config_path.display());
        process::exit(0);
    }

    let report = probe(&config, &BackendHandle::native());
    print!("{}", report);

    if report.is_success() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}
