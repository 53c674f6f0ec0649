//! Internal utility functions for the driver core
//!
//! Shared helpers used across the scan and cache modules.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{ModelboxError, Result};

/// Derive the scan cache check code from the summed file mtimes.
///
/// Equality of check codes implies the scanned file set is unchanged.
pub(crate) fn generate_key(modify_time_sum: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(modify_time_sum.to_string());
    format!("{:x}", hasher.finalize())
}

/// List entries matching `filter` at depth 1 inside `dir`.
pub(crate) fn list_files(dir: &Path, filter: &str) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(filter);
    let pattern = pattern
        .to_str()
        .ok_or_else(|| ModelboxError::InvalidInput(format!("non-utf8 path: {:?}", dir)))?;

    let paths = glob::glob(pattern)
        .map_err(|e| ModelboxError::InvalidInput(format!("bad glob {}: {}", pattern, e)))?;

    let mut files: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
    files.sort();
    Ok(files)
}

/// Modification time of a file in whole seconds.
pub(crate) fn mtime_secs(meta: &Metadata) -> i64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.mtime()
    }
    #[cfg(not(unix))]
    {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Run `func` in a forked child process and wait for it to finish.
///
/// The child's exit status is the only thing the parent observes; all
/// memory mutations the closure performs stay in the child. Used to keep
/// transient dlopen/dlsym side effects out of the calling process.
#[cfg(unix)]
pub(crate) fn subprocess_run<F>(func: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match unsafe { libc::fork() } {
        -1 => Err(ModelboxError::Io(std::io::Error::last_os_error())),
        0 => {
            let code = match func() {
                Ok(()) => 0,
                Err(e) => {
                    log::error!("subprocess task failed: {}", e);
                    1
                }
            };
            unsafe { libc::_exit(code) }
        }
        pid => {
            let mut status: libc::c_int = 0;
            loop {
                let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
                if ret == -1 {
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        continue;
                    }
                    return Err(ModelboxError::Io(err));
                }
                break;
            }

            if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
                Ok(())
            } else {
                Err(ModelboxError::Fault(format!(
                    "subprocess exited abnormally, status: {}",
                    status
                )))
            }
        }
    }
}

/// Fallback for platforms without fork: run the task in the current
/// process, accepting the dlopen leakage risk.
#[cfg(not(unix))]
pub(crate) fn subprocess_run<F>(func: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    func()
}
