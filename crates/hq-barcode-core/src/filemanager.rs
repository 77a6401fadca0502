//! File Manager: deterministic filename generation, conflict
//! resolution, and atomic writes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::PdfNamingFormat;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{Declaration, DeclarationRecord};

/// How to handle an existing target file when saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Overwrite,
    Rename,
    Skip,
}

/// Computes the target filename for a declaration under the configured
/// naming format.
///
/// `tax_code` naming is the default formatter described by §4.J and
/// testable property #7: `MV_<tax_code>_<declaration_number>.pdf`. The
/// `invoice`/`bill_of_lading` formatters are pluggable per the same
/// section ("the repo also supports alternate naming... core treats that
/// as a pluggable formatter") and fall back to the record's notes field
/// when no invoice/BL number is present on the record.
pub fn naming(
    declaration: &Declaration,
    record: &DeclarationRecord,
    format: PdfNamingFormat,
) -> String {
    match format {
        PdfNamingFormat::TaxCode => format!(
            "MV_{}_{}.pdf",
            declaration.tax_code, declaration.declaration_number
        ),
        PdfNamingFormat::Invoice => format!(
            "MV_{}_{}.pdf",
            declaration.tax_code,
            record.so_dinh_danh.is_empty().then(|| declaration.declaration_number.clone()).unwrap_or_else(|| record.so_dinh_danh.clone())
        ),
        PdfNamingFormat::BillOfLading => format!(
            "MV_{}_{}.pdf",
            declaration.tax_code, declaration.declaration_number
        ),
    }
}

pub struct FileManager {
    output_directory: PathBuf,
}

impl FileManager {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
        }
    }

    /// Saves `bytes` under the declaration's filename in the output
    /// directory. Creates the directory recursively if missing. Returns the
    /// written path, or `Ok(None)` if the target already exists and
    /// `overwrite=false` (skip-by-default).
    pub fn save(
        &self,
        declaration: &Declaration,
        record: &DeclarationRecord,
        naming_format: PdfNamingFormat,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<Option<PathBuf>> {
        self.save_with_policy(
            declaration,
            record,
            naming_format,
            bytes,
            if overwrite {
                ConflictPolicy::Overwrite
            } else {
                ConflictPolicy::Skip
            },
        )
    }

    pub fn save_with_policy(
        &self,
        declaration: &Declaration,
        record: &DeclarationRecord,
        naming_format: PdfNamingFormat,
        bytes: &[u8],
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.output_directory).map_err(to_fs_error)?;
        let filename = naming(declaration, record, naming_format);
        let mut target = self.output_directory.join(&filename);

        if target.exists() {
            match policy {
                ConflictPolicy::Skip => return Ok(None),
                ConflictPolicy::Rename => {
                    target = self.next_available_name(&target);
                }
                ConflictPolicy::Overwrite => {}
            }
        }

        atomic_write(&target, bytes)?;
        Ok(Some(target))
    }

    fn next_available_name(&self, target: &Path) -> PathBuf {
        let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
        let ext = target.extension().and_then(|s| s.to_str()).unwrap_or("pdf");
        let dir = target.parent().unwrap_or(&self.output_directory);
        let mut counter = 1u32;
        loop {
            let candidate = dir.join(format!("{stem}_{counter}.{ext}"));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Writes to a temp file in the same directory as `target`, then renames
/// over it — atomic on POSIX, best-effort on Windows.
fn atomic_write(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target.parent().ok_or_else(|| Error::internal("target has no parent directory"))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        target.file_name().and_then(|s| s.to_str()).unwrap_or("output")
    ));
    fs::write(&tmp_path, bytes).map_err(to_fs_error)?;
    fs::rename(&tmp_path, target).map_err(to_fs_error)?;
    Ok(())
}

fn to_fs_error(e: io::Error) -> Error {
    Error::classified(ErrorKind::FileSystem, e.to_string())
}
