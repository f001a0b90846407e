use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{error::TryOnError, pipeline::CompositeResult};

/// A platform share mechanism (share sheet, messaging hook, ...).
pub trait ShareTarget {
    fn share(&self, data_url: &str, file_name: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared,
    Saved(PathBuf),
}

pub fn default_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("nail-design-{millis}.png")
}

/// Writes the composite as a PNG file at `path`, creating parent directories.
pub fn save_png(result: &CompositeResult, path: &Path) -> Result<(), TryOnError> {
    let io_err = |source| TryOnError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, result.to_png()?).map_err(io_err)
}

/// Saves the composite into `dir` under a timestamped name.
pub fn save_to_file(result: &CompositeResult, dir: &Path) -> Result<PathBuf, TryOnError> {
    let path = dir.join(default_file_name());
    save_png(result, &path)?;
    log::info!("saved try-on image to {}", path.display());
    Ok(path)
}

/// Hands the image to `target` when there is one, saving to `dir` if there
/// isn't or if sharing fails.
pub fn share_or_save(
    result: &CompositeResult,
    target: Option<&dyn ShareTarget>,
    dir: &Path,
) -> Result<ShareOutcome, TryOnError> {
    if let Some(target) = target {
        let data_url = result.to_data_url()?;
        match target.share(&data_url, &default_file_name()) {
            Ok(()) => return Ok(ShareOutcome::Shared),
            Err(err) => log::warn!("sharing failed, saving instead: {err:?}"),
        }
    }
    save_to_file(result, dir).map(ShareOutcome::Saved)
}
