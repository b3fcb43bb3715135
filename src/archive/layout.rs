//! Staging-tree layout: wrapper detection and merging into the target.

use log::debug;
use std::path::{Component, Path, PathBuf};

use crate::error::ExtractionError;
use crate::runtime::Runtime;

pub(crate) fn io_error(path: &Path, err: &anyhow::Error) -> ExtractionError {
    ExtractionError::Io {
        path: path.to_path_buf(),
        reason: format!("{:#}", err),
    }
}

/// Turns an archive entry name into a relative path, or `None` if it would
/// escape the extraction root. Accepts `\` separators.
pub(crate) fn safe_relative(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Top-level directories of an OBS installation. A lone one of these is the
/// layout itself, never a wrapper.
const OBS_TREE_ROOTS: &[&str] = &["bin", "data", "obs-plugins"];

fn is_obs_tree_root(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| OBS_TREE_ROOTS.iter().any(|root| root.eq_ignore_ascii_case(name)))
}

/// The directory whose contents get installed.
///
/// With `unwrap`, a staging root holding exactly one directory and nothing
/// else yields that directory, unless it is one of the OBS tree roots.
pub(crate) fn content_root(
    runtime: &dyn Runtime,
    staging: &Path,
    unwrap: bool,
) -> Result<PathBuf, ExtractionError> {
    let entries = runtime
        .read_dir(staging)
        .map_err(|e| io_error(staging, &e))?;

    match entries.as_slice() {
        [] => Err(ExtractionError::Empty(staging.to_path_buf())),
        [single] if unwrap && runtime.is_dir(single) && !is_obs_tree_root(single) => {
            debug!("Unwrapping single top-level directory {:?}", single);
            Ok(single.clone())
        }
        _ => Ok(staging.to_path_buf()),
    }
}

/// Moves everything under `source` into `target`, merging directories and
/// overwriting files. Returns installed file paths relative to `target`.
pub(crate) fn merge_into(
    runtime: &dyn Runtime,
    source: &Path,
    target: &Path,
) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut installed = Vec::new();
    merge_dir(runtime, source, target, Path::new(""), &mut installed)?;
    Ok(installed)
}

fn merge_dir(
    runtime: &dyn Runtime,
    source: &Path,
    target: &Path,
    relative: &Path,
    installed: &mut Vec<PathBuf>,
) -> Result<(), ExtractionError> {
    if runtime.exists(target) && !runtime.is_dir(target) {
        runtime
            .remove_file(target)
            .map_err(|e| io_error(target, &e))?;
    }
    runtime
        .create_dir_all(target)
        .map_err(|e| io_error(target, &e))?;

    for item in runtime.read_dir(source).map_err(|e| io_error(source, &e))? {
        let Some(name) = item.file_name() else {
            continue;
        };
        let dest = target.join(name);
        let rel = relative.join(name);

        if runtime.is_dir(&item) {
            merge_dir(runtime, &item, &dest, &rel, installed)?;
            continue;
        }

        if runtime.is_dir(&dest) {
            runtime
                .remove_dir_all(&dest)
                .map_err(|e| io_error(&dest, &e))?;
        } else if runtime.exists(&dest) {
            // Windows refuses to rename over an existing file
            runtime
                .remove_file(&dest)
                .map_err(|e| io_error(&dest, &e))?;
        }
        runtime
            .rename(&item, &dest)
            .map_err(|e| io_error(&dest, &e))?;
        installed.push(rel);
    }

    Ok(())
}
