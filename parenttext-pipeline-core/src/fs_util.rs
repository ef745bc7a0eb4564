use std::fs;
use std::io;
use std::path::Path;

/// Removes `path` with everything below it, then recreates it empty.
pub fn clear_or_create_dir(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)
}
