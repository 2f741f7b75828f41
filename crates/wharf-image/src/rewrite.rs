//! Entry-by-entry archive rewrite.

use std::io::{self, Read, Write};

use chrono::Utc;
use wharf_common::WharfResult;

use crate::repositories::{REPOSITORIES_ENTRY, rewrite_repositories};

/// Copy the tar archive in `input` to `output`, renaming its image to `id`.
///
/// Entries are copied raw, header then body, so everything except the
/// `repositories` file comes out byte-identical. The `repositories` file gets
/// a fresh size, modification time and checksum.
///
/// # Errors
///
/// Fails on malformed tar input, a malformed `repositories` file or a write
/// failure.
pub fn rewrite_archive<R, W>(input: R, output: W, id: &str) -> WharfResult<W>
where
    R: Read,
    W: Write,
{
    let mut archive = tar::Archive::new(input);
    let mut builder = tar::Builder::new(Gate {
        inner: output,
        open: true,
    });

    match copy_entries(&mut archive, &mut builder, id) {
        Ok(entries) => {
            tracing::debug!(image = id, entries, "Rewrote archive");
            Ok(builder.into_inner()?.inner)
        }
        Err(e) => {
            // No end-of-archive marker: a reader must see a truncated archive.
            builder.get_mut().open = false;
            Err(e)
        }
    }
}

fn copy_entries<R, W>(
    archive: &mut tar::Archive<R>,
    builder: &mut tar::Builder<W>,
    id: &str,
) -> WharfResult<usize>
where
    R: Read,
    W: Write,
{
    let mut entries = 0usize;
    for entry in archive.entries()?.raw(true) {
        let mut entry = entry?;
        entries += 1;
        let mut header = entry.header().clone();

        let is_repositories = header.entry_type().is_file()
            && entry.path_bytes().as_ref() == REPOSITORIES_ENTRY.as_bytes();
        if !is_repositories {
            builder.append(&header, &mut entry)?;
            continue;
        }

        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let body = rewrite_repositories(&raw, id)?;

        header.set_size(body.len() as u64);
        header.set_mtime(u64::try_from(Utc::now().timestamp()).unwrap_or_default());
        header.set_cksum();
        builder.append(&header, body.as_slice())?;
    }
    Ok(entries)
}

/// Writer that can be shut so nothing more reaches `inner`.
struct Gate<W> {
    inner: W,
    open: bool,
}

impl<W: Write> Write for Gate<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.open {
            self.inner.write(buf)
        } else {
            Err(io::Error::other("archive rewrite aborted"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
