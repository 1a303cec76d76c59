//! Atomic file writes with automatic parent creation, plus line appends
//! for journals.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Write `bytes` to `dest` through a sibling temp file and a rename, so a
/// reader sees either the old file or the complete new one.
pub fn atomic_write(dest: impl AsRef<Path>, bytes: impl AsRef<[u8]>) -> io::Result<()> {
    let dest = dest.as_ref();
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes.as_ref())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Append one line (a trailing `\n` is added) in a single write.
pub fn append_line(dest: impl AsRef<Path>, line: &str) -> io::Result<()> {
    let dest = dest.as_ref();
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(dest)?;
    file.write_all(buf.as_bytes())?;
    file.sync_data()
}
