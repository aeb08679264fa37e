//! External process helpers.
//!
//! - [`process::exec_command`] runs a one-shot command and captures output.
//! - [`locate_binary`] resolves a configured binary (bare name or path) so
//!   callers can report a missing dependency before trying to run it.

use std::path::{Path, PathBuf};

use crate::util::expand_tilde;

pub mod process;

/// Resolve a configured binary to an absolute path.
///
/// Values containing a `/` are treated as paths (with `~` expansion) and must
/// exist; bare names are looked up in `PATH`. Returns `None` when the binary
/// cannot be found.
pub fn locate_binary(binary: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let expanded = expand_tilde(binary);
        let path = Path::new(expanded.as_ref());
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(binary).ok()
}
