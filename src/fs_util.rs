use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::HarvestError;

/// Walks the archive end to end so truncated or corrupt zips fail
/// integrity before they are persisted.
pub fn validate_zip(zip_path: &Path) -> Result<(), HarvestError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| HarvestError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| HarvestError::Integrity(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| HarvestError::Integrity(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| HarvestError::Integrity(err.to_string()))?;
    }
    Ok(())
}
