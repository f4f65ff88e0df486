use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace `dst` with `content` using write-to-temp-then-rename.
///
/// The temp file lives next to `dst` so the final rename stays on one
/// filesystem. Readers observe either the old file or the complete new one.
pub fn atomic_write(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path_for(dst);

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // rename() refuses to replace an existing file on Windows
        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }

        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// Unpredictable sibling path, so a pre-planted symlink cannot be followed.
fn temp_path_for(dst: &Path) -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}.tmp.{:016x}", file_name, random_suffix))
}
