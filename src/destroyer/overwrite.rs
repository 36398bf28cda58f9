//! In-place overwrite passes for the fast destroyer.
//!
//! Writes are performed through the existing file handle so the passes land
//! on the file's current allocation wherever the filesystem allows it.
//! Journaling and CoW filesystems may still relocate blocks; that limitation
//! is documented, not worked around.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;

/// Chunk cap per write: min(1 MiB, file size).
const CHUNK_BYTES: u64 = 1024 * 1024;

/// Overwrite a regular file of known non-zero size with `passes` rounds of
/// random data, flushing and syncing between passes.
pub(crate) fn overwrite_file(path: &Path, size: u64, passes: u8) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;

    #[allow(clippy::cast_possible_truncation)]
    let chunk = CHUNK_BYTES.min(size) as usize;
    let mut buf = vec![0u8; chunk];
    let mut rng = rand::rng();

    for _ in 0..passes.max(1) {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = size;
        while remaining > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let n = remaining.min(chunk as u64) as usize;
            rng.fill_bytes(&mut buf[..n]);
            file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        file.flush()?;
        file.sync_data()?;
    }

    Ok(())
}
