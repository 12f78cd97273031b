use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Mode given to files that did not exist before the first write.
#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o644;

/// Replace `target` with `data` so readers see either the old or the new file.
///
/// The content is written to a temp file in the target's directory and renamed
/// over the target. An existing target keeps its permission bits.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    if let Ok(metadata) = fs::symlink_metadata(target)
        && metadata.is_dir()
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", target.display()),
        ));
    }

    let temp = tempfile::NamedTempFile::new_in(parent)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(target)
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(NEW_FILE_MODE);
        if let Err(e) = fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode)) {
            tracing::warn!(path = %temp.path().display(), error = %e, "failed to set temp file permissions");
        }
    }

    let mut file = temp.as_file();
    file.write_all(data)?;
    file.sync_all()?;

    temp.persist(target).map_err(|e| e.error)?;
    tracing::debug!(path = %target.display(), bytes = data.len(), "wrote file");
    Ok(())
}
