use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use log::info;

use crate::config::defs::{PipelineError, CLEAN_TAG, FASTQ_EXTS, GZIP_EXT};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(head)?;
    writeln!(writer)?;
    writer.write_all(seq)?;
    writeln!(writer)?;
    writeln!(writer, "+")?;
    writer.write_all(qual)?;
    writeln!(writer)?;
    Ok(())
}


/// Name for a pipeline-processed copy of `input`: the `rqc` tag (and any extra tags) go in
/// front of the FASTQ extension and the result always ends in `.gz`.
///
/// # Arguments
///
/// * `input` - Input FASTQ path; only the file name is used.
/// * `extra` - Further tags, e.g. `["merged"]`.
///
/// # Returns
/// `reads.fq.gz` -> `reads.rqc.fq.gz`, `reads.fastq` -> `reads.rqc.fastq.gz`.
pub fn clean_file_name(input: &Path, extra: &[&str]) -> Result<String, PipelineError> {
    let bad_name = || {
        PipelineError::InvalidInput(format!(
            "Could not parse the name of {}. Please make sure it ends in .fq, .fastq, .fq.gz or .fastq.gz",
            input.display()
        ))
    };
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(bad_name)?;
    let mut parts: Vec<&str> = file_name.split('.').collect();

    if parts.last() == Some(&GZIP_EXT) {
        parts.pop();
    }
    let ext = parts.pop().ok_or_else(bad_name)?;
    if !FASTQ_EXTS.contains(&ext) || parts.is_empty() || parts.iter().all(|p| p.is_empty()) {
        return Err(bad_name());
    }

    parts.push(CLEAN_TAG);
    parts.extend(extra.iter().copied());
    parts.push(ext);
    parts.push(GZIP_EXT);
    Ok(parts.join("."))
}


/// Creates the output directory. An existing directory is replaced only when `overwrite` is set.
pub fn prepare_output_dir(path: &Path, overwrite: bool) -> Result<(), PipelineError> {
    if path.exists() {
        if !overwrite {
            return Err(PipelineError::directory(
                path,
                "The output directory already exists, check the output flag or pass --overwrite",
            ));
        }
        info!("Removing existing output directory {}", path.display());
        fs::remove_dir_all(path).map_err(|e| PipelineError::directory(path, e))?;
    }
    fs::create_dir_all(path).map_err(|e| PipelineError::directory(path, e))
}


pub fn copy_dir_all(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Renames `src` to `dest`, copying then deleting when they sit on different filesystems.
pub fn move_dir(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_all(src, dest)?;
            fs::remove_dir_all(src)
        }
    }
}
