use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use seq_io::fastq::{OwnedRecord, Reader, Record};

use crate::config::defs::PipelineError;
use crate::utils::file::{is_gzipped, write_fastq_record};

pub enum FastqReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FastqReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FastqReader::Uncompressed(r) => r.read(buf),
            FastqReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn fastq_reader(path: &Path) -> io::Result<Reader<FastqReader>> {
    let file = File::open(path)?;
    let reader = if is_gzipped(path)? {
        Reader::new(FastqReader::Gzipped(GzDecoder::new(file)))
    } else {
        Reader::new(FastqReader::Uncompressed(BufReader::new(file)))
    };
    Ok(reader)
}


/// One read file handed to a stage. Built fresh for every stage input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFile {
    abspath: PathBuf,
    file_name: String,
}

impl SampleFile {
    pub fn new(path: &Path) -> Result<Self, PipelineError> {
        let abspath = std::path::absolute(path)
            .map_err(|e| PipelineError::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let file_name = abspath
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| PipelineError::InvalidInput(format!("{} has no file name", path.display())))?;
        Ok(SampleFile {
            abspath,
            file_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.abspath
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn exists(&self) -> bool {
        self.abspath.is_file()
    }
}

impl fmt::Display for SampleFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abspath.display())
    }
}


/// Number of records in a plain or gzipped FASTQ.
pub fn count_records(path: &Path) -> Result<u64> {
    let mut reader = fastq_reader(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        record.map_err(|e| anyhow!("Malformed FASTQ {}: {}", path.display(), e))?;
        count += 1;
    }
    Ok(count)
}


/// Rewrites `input` as a gzipped FASTQ with records ordered by header.
///
/// # Arguments
///
/// * `input` - Plain or gzipped FASTQ.
/// * `output` - Destination, always gzip compressed.
///
/// # Returns
/// Number of records written.
pub fn sort_by_name(input: &Path, output: &Path) -> Result<usize> {
    let mut reader = fastq_reader(input).with_context(|| format!("Opening {}", input.display()))?;
    let mut records: Vec<OwnedRecord> = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| anyhow!("Malformed FASTQ {}: {}", input.display(), e))?;
        records.push(record.to_owned_record());
    }
    records.sort_by(|a, b| a.head.cmp(&b.head));

    let file = File::create(output).with_context(|| format!("Creating {}", output.display()))?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    for record in &records {
        write_fastq_record(&mut writer, record.head(), record.seq(), record.qual())?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Flushing {}: {}", output.display(), e.error()))?
        .finish()?
        .flush()?;
    Ok(records.len())
}
