//! Disk usage of a directory tree.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Bytes allocated on disk under `path`, like `du -s -B1 -x`.
///
/// Symlinks are counted but not followed, the walk stays on one filesystem,
/// and hard-linked files are counted once. A path that does not exist uses
/// zero bytes. Entries that vanish during the walk are skipped.
pub fn disk_used_in_bytes(path: &Path) -> io::Result<u64> {
    match std::fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    let mut seen = HashSet::new();
    let mut total = 0u64;

    for entry in WalkDir::new(path).follow_links(false).same_file_system(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if skippable(&e) => {
                debug!("Skipping entry during disk usage walk: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if skippable(&e) => continue,
            Err(e) => return Err(e.into()),
        };

        total += allocated(&metadata, &mut seen);
    }

    Ok(total)
}

/// Entries removed or made unreadable while walking
fn skippable(e: &walkdir::Error) -> bool {
    matches!(
        e.io_error().map(io::Error::kind),
        None | Some(io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied)
    )
}

#[cfg(unix)]
fn allocated(metadata: &std::fs::Metadata, seen: &mut HashSet<(u64, u64)>) -> u64 {
    use std::os::unix::fs::MetadataExt;

    if metadata.nlink() > 1 && !metadata.is_dir() && !seen.insert((metadata.dev(), metadata.ino())) {
        return 0;
    }
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated(metadata: &std::fs::Metadata, _seen: &mut HashSet<(u64, u64)>) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Incompressible, flushed file so the allocation is visible to stat
    fn write_noise(path: &Path, len: usize) {
        let mut state = 0x9e37_79b9_u32;
        let bytes: Vec<u8> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn test_missing_path_uses_nothing() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(disk_used_in_bytes(&temp_dir.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_usage_close_to_bytes_written() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("data");
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        let size = 10_000usize;
        write_noise(&dir.join("a"), size);
        write_noise(&dir.join("nested/b"), size);

        let used = disk_used_in_bytes(&dir).unwrap();
        let written = 2 * size as u64;
        assert!(used > written / 4, "{} vs {}", used, written);
        assert!(used < written * 4, "{} vs {}", used, written);
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_links_counted_once() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, vec![b'x'; 64 * 1024]).unwrap();
        let single = disk_used_in_bytes(temp_dir.path()).unwrap();

        std::fs::hard_link(&file, temp_dir.path().join("link")).unwrap();
        assert_eq!(disk_used_in_bytes(temp_dir.path()).unwrap(), single);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("big"), vec![b'x'; 256 * 1024]).unwrap();

        let dir = temp_dir.path().join("dir");
        std::fs::create_dir(&dir).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.join("link")).unwrap();

        assert!(disk_used_in_bytes(&dir).unwrap() < 256 * 1024);
    }
}
