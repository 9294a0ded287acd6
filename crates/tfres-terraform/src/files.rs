use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::TerraformError;
use crate::model::BACKEND_OVERRIDE_FILE;

/// Copy every override file into `source`. Each entry must be an existing file.
pub fn copy_override_files(source: &Path, files: &[PathBuf]) -> Result<(), TerraformError> {
    for file in files {
        check_override_source(file)?;
        let name = file.file_name().ok_or_else(|| {
            TerraformError::Override(format!("override source '{}' has no file name", file.display()))
        })?;
        let dest = source.join(name);
        std::fs::copy(file, &dest).map_err(|e| TerraformError::io(&dest, e))?;
        debug!(src = %file.display(), dst = %dest.display(), "copied override file");
    }
    Ok(())
}

/// Copy `{src, dst}` entries; `dst` is a directory relative to `source`
/// (usually inside `.terraform/modules`) and must already exist.
pub fn copy_module_override_files(
    source: &Path,
    entries: &[BTreeMap<String, Value>],
) -> Result<(), TerraformError> {
    for entry in entries {
        let src = entry_path(entry, "src")?;
        let dst = entry_path(entry, "dst")?;
        check_override_source(&src)?;

        let dst_dir = source.join(&dst);
        if !dst_dir.exists() {
            return Err(TerraformError::Override(format!(
                "override destination directory '{}' does not exist",
                dst.display()
            )));
        }
        if !dst_dir.is_dir() {
            return Err(TerraformError::Override(format!(
                "override destination '{}' is a file, must pass directory instead",
                dst.display()
            )));
        }

        let name = src.file_name().ok_or_else(|| {
            TerraformError::Override(format!("override source '{}' has no file name", src.display()))
        })?;
        let dest = dst_dir.join(name);
        std::fs::copy(&src, &dest).map_err(|e| TerraformError::io(&dest, e))?;
        debug!(src = %src.display(), dst = %dest.display(), "copied module override file");
    }
    Ok(())
}

fn entry_path(entry: &BTreeMap<String, Value>, key: &str) -> Result<PathBuf, TerraformError> {
    match entry.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(PathBuf::from(s)),
        Some(Value::String(_)) | None => {
            Err(TerraformError::Override(format!("does not include {} key", key)))
        }
        Some(other) => Err(TerraformError::Override(format!(
            "{} key must be a string, got {}",
            key, other
        ))),
    }
}

fn check_override_source(src: &Path) -> Result<(), TerraformError> {
    if !src.exists() {
        return Err(TerraformError::Override(format!(
            "override source file '{}' does not exist",
            src.display()
        )));
    }
    if src.is_dir() {
        return Err(TerraformError::Override(format!(
            "override source '{}' is as directory, must pass files instead",
            src.display()
        )));
    }
    Ok(())
}

/// Link `plugin_dir` to `<source>/terraform.d/plugins` unless the module
/// already ships its own plugins directory.
pub fn link_plugin_dir(source: &Path, plugin_dir: &Path) -> Result<(), TerraformError> {
    let target = source.join("terraform.d").join("plugins");
    if target.exists() || target.symlink_metadata().is_ok() {
        info!(path = %target.display(), "module provides terraform.d/plugins, not linking plugin_dir");
        return Ok(());
    }
    let plugin_dir = std::fs::canonicalize(plugin_dir).map_err(|e| TerraformError::io(plugin_dir, e))?;
    let parent = source.join("terraform.d");
    std::fs::create_dir_all(&parent).map_err(|e| TerraformError::io(&parent, e))?;

    symlink_dir(&plugin_dir, &target)?;
    debug!(from = %target.display(), to = %plugin_dir.display(), "linked plugin dir");
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(original: &Path, link: &Path) -> Result<(), TerraformError> {
    std::os::unix::fs::symlink(original, link).map_err(|e| TerraformError::io(link, e))
}

#[cfg(windows)]
fn symlink_dir(original: &Path, link: &Path) -> Result<(), TerraformError> {
    std::os::windows::fs::symlink_dir(original, link).map_err(|e| TerraformError::io(link, e))
}

/// Write the `terraform { backend "<type>" {} }` override into `source`.
pub fn write_backend_override(source: &Path, backend_type: &str) -> Result<(), TerraformError> {
    let path = source.join(BACKEND_OVERRIDE_FILE);
    let content = format!("terraform {{\n  backend \"{}\" {{}}\n}}\n", backend_type);
    std::fs::write(&path, content).map_err(|e| TerraformError::io(&path, e))
}
