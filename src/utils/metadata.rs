// src/utils/metadata.rs: stage artifacts -> metadata.json

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::defs::PipelineError;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative to the staging tree root, `/` separated.
    pub path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub pipeline: String,
    pub input: String,
    pub stages: BTreeMap<String, Vec<FileRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_reads: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

impl RunMetadata {
    pub fn to_json(&self) -> Result<String, PipelineError> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::Metadata(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::Metadata(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let json = self.to_json()?;
        fs::write(path, json)
            .map_err(|e| PipelineError::Metadata(format!("Writing {}: {}", path.display(), e)))
    }
}


pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn walk(root: &Path, dir: &Path, checksums: bool, records: &mut Vec<FileRecord>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, checksums, records)?;
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let path_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        records.push(FileRecord {
            path: path_str,
            size_bytes: entry.metadata()?.len(),
            sha256: if checksums { Some(sha256_file(&path)?) } else { None },
        });
    }
    Ok(())
}

/// Every file under `stage_dir`, recursively, sorted by path relative to `root`.
pub fn list_stage_files(root: &Path, stage_dir: &Path, checksums: bool) -> Result<Vec<FileRecord>, PipelineError> {
    let mut records = Vec::new();
    walk(root, stage_dir, checksums, &mut records)
        .map_err(|e| PipelineError::Metadata(format!("Listing {}: {}", stage_dir.display(), e)))?;
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}


/// Walks each top-level stage directory of a staging tree.
///
/// # Arguments
///
/// * `root` - Staging tree root (or the retained copy of it).
/// * `checksums` - Hash every file.
///
/// # Returns
/// stage directory name -> file records. Loose files at the root are ignored.
pub fn aggregate(root: &Path, checksums: bool) -> Result<BTreeMap<String, Vec<FileRecord>>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::Metadata(format!(
            "Staging tree {} does not exist",
            root.display()
        )));
    }
    let entries = fs::read_dir(root)
        .map_err(|e| PipelineError::Metadata(format!("Reading {}: {}", root.display(), e)))?;

    let mut stages = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::Metadata(e.to_string()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        stages.insert(name, list_stage_files(root, &path, checksums)?);
    }
    Ok(stages)
}
