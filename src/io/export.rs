//! Save dataset documents locally.
//!
//! The saved file is byte-for-byte the document uploaded to CDE, so it can be
//! inspected or re-uploaded by hand.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::domain::DatasetDescription;
use crate::error::{AppError, EXIT_USAGE};

/// Write the JSON-LD document into `dir` (created if needed). Returns the file path.
pub fn write_definition_json(dir: &Path, description: &DatasetDescription) -> Result<PathBuf, AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(EXIT_USAGE, format!("Failed to create directory '{}': {e}", dir.display())))?;

    let path = dir.join(description.definition_file_name());
    let file = File::create(&path)
        .map_err(|e| AppError::new(EXIT_USAGE, format!("Failed to create dataset definition '{}': {e}", path.display())))?;

    serde_json::to_writer_pretty(file, &description.to_jsonld())
        .map_err(|e| AppError::new(EXIT_USAGE, format!("Failed to write dataset definition: {e}")))?;

    Ok(path)
}
