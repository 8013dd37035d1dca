//! Post-copy verification

use copytask_types::{Error, Result, VerifyMode};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Check that `destination` matches `source` according to `mode`
pub async fn verify_copy(source: &Path, destination: &Path, mode: VerifyMode) -> Result<()> {
    if mode == VerifyMode::Off {
        return Ok(());
    }

    let source_len = fs::metadata(source)
        .await
        .map_err(|e| Error::io(source, e))?
        .len();
    let destination_len = fs::metadata(destination)
        .await
        .map_err(|e| Error::io(destination, e))?
        .len();

    if source_len != destination_len {
        return Err(Error::verification(
            destination,
            format!("size mismatch: source {source_len} bytes, destination {destination_len} bytes"),
        ));
    }

    if mode == VerifyMode::Checksum {
        let (expected, actual) =
            tokio::try_join!(file_digest(source.to_path_buf()), file_digest(destination.to_path_buf()))?;
        if expected != actual {
            return Err(Error::verification(
                destination,
                format!("checksum mismatch: expected {expected}, found {actual}"),
            ));
        }
    }

    Ok(())
}

/// BLAKE3 digest of a file's contents
pub async fn file_digest(path: PathBuf) -> Result<blake3::Hash> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path).map_err(|e| Error::io(&path, e))?;
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| Error::io(&path, e))?;
        Ok(hasher.finalize())
    })
    .await
    .map_err(|e| Error::other(format!("Digest task failed: {e}")))?
}
