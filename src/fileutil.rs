#![allow(deprecated)]
//! Small filesystem helpers shared across components: home-directory
//! display, atomic temp-then-rename writes, and mod-source-file scanning.
use std::{
    borrow::Cow,
    env,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::constant::MOD_FILE_EXTENSION;
use crate::error::Error;

/// Replaces the user's home directory prefix with `~/`, for log messages.
pub fn replace_home_dir_with_tilde(destination: &Path) -> Cow<'_, str> {
    let home = match env::home_dir() {
        Some(h) => h,
        None => return destination.to_string_lossy(),
    };

    match destination.strip_prefix(&home) {
        Ok(relative_path) => Cow::Owned(format!("~/{}", relative_path.display())),
        Err(_) => destination.to_string_lossy(),
    }
}

/// Writes `contents` to `path` atomically: a temp file is created in the
/// same directory, flushed, fsync'd, and renamed over `path`. This is the
/// one write primitive every component that persists state (the manifest
/// store, the injector, the loader generator) builds on, per §5's "no
/// partial file, because of atomic rename" guarantee.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let dir = path.parent().ok_or_else(|| {
        Error::NotFound(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".vmm-tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file_mut().sync_all()?;

    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Like [`write_atomic`] but preserves the Unix permission bits of the file
/// being replaced, used by the injector when rewriting HTML targets in
/// place (§4.5 step 5: "preserving permissions").
#[cfg(unix)]
pub fn write_atomic_preserving_permissions(path: &Path, contents: &[u8]) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path).ok().map(|meta| meta.permissions().mode());

    let dir = path.parent().ok_or_else(|| {
        Error::NotFound(format!("{} has no parent directory", path.display()))
    })?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".vmm-tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file_mut().sync_all()?;

    if let Some(mode) = mode {
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
    }

    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn write_atomic_preserving_permissions(path: &Path, contents: &[u8]) -> Result<(), Error> {
    write_atomic(path, contents)
}

/// Scans a mods root directory for user-dropped `.js` mod source files
/// (non-recursive — the mods root is flat by contract).
pub fn find_mod_source_files(mods_root: &Path) -> Result<Vec<PathBuf>, Error> {
    if !mods_root.exists() {
        return Ok(Vec::new());
    }

    debug!(
        "scanning mods root {:?}",
        replace_home_dir_with_tilde(mods_root)
    );

    let mut files = Vec::new();
    for entry in fs::read_dir(mods_root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MOD_FILE_EXTENSION))
        {
            files.push(path);
        }
    }
    Ok(files)
}

/// Reads file metadata needed to populate a `ModEntry`'s observed fields.
pub fn file_observed_metadata(path: &Path) -> Result<(u64, std::time::SystemTime), Error> {
    let meta = File::open(path)?.metadata()?;
    Ok((meta.len(), meta.modified()?))
}
