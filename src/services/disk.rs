use camino::Utf8Path;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Pre-flight disk-space check for the filesystem hosting generated output.
///
/// Pure query; never mutates state.
pub struct DiskSpaceGuard;

impl DiskSpaceGuard {
    /// Returns `(ok, free_gb)`. If the underlying OS query fails, the guard
    /// fails open (reports space available) so an unrelated infrastructure
    /// fault cannot block all runs.
    pub fn check(path: &Utf8Path, min_free_gb: f64) -> (bool, f64) {
        match fs4::available_space(path.as_std_path()) {
            Ok(bytes) => {
                let free_gb = bytes as f64 / BYTES_PER_GB;
                (free_gb >= min_free_gb, free_gb)
            }
            Err(e) => {
                tracing::error!("Failed to check disk space for {}: {}", path, e);
                (true, 0.0)
            }
        }
    }
}
