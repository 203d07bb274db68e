// src/utils/system.rs: System functions

use std::path::{Path, PathBuf};

use log::{debug, warn};
use sysinfo::System;


/// Determines number of threads handed to each tool
///
/// # Arguments
///
/// * `requested` - Thread count from the command line
///
/// # Returns
///
/// usize: `requested` capped at the physical core count, at least 1
pub fn detect_threads(requested: usize) -> usize {
    let physical_cores = System::physical_core_count().unwrap_or(1);
    let threads = cap_threads(requested, physical_cores);
    if threads < requested {
        warn!(
            "Requested {} threads but only {} physical cores are available; using {}",
            requested, physical_cores, threads
        );
    }
    debug!("Using {} threads per tool", threads);
    threads
}

fn cap_threads(requested: usize, physical_cores: usize) -> usize {
    requested.min(physical_cores).max(1)
}


/// Parent directory for the run's staging tree.
/// Uses `configured` when given, otherwise the standard temp dir.
///
/// # Returns
/// PathBuf: directory the staging tree is created under.
pub fn get_temp_dir(configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) => dir.to_path_buf(),
        None => std::env::temp_dir(),
    }
}
