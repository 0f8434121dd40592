pub mod config;
pub mod probe;

pub use config::{Config, LibraryConfig, load_config, parse_config};
pub use probe::{LibraryOutcome, LibraryReport, ProbeReport, probe};
