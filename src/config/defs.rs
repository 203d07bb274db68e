use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::Arguments;

// External software
pub const BBDUK_TAG: &str = "bbduk.sh";
pub const BBSPLIT_TAG: &str = "bbsplit.sh";
pub const CLUMPIFY_TAG: &str = "clumpify.sh";
pub const BBMERGE_TAG: &str = "bbmerge.sh";
pub const KHIST_TAG: &str = "khist.sh";
pub const SENDSKETCH_TAG: &str = "sendsketch.sh";
pub const COVERAGE_EST_TAG: &str = "coverage_est.R";

// Static Filenames
pub const FILTERED_FASTQ: &str = "clean1.fq.gz";
pub const FILTER_STATS: &str = "scaffoldStats1.txt";
pub const BASE_HIST: &str = "bhist.txt";
pub const QUALITY_HIST: &str = "qhist.txt";
pub const QUALITY_COUNT_HIST: &str = "qchist.txt";
pub const AVG_QUALITY_HIST: &str = "aqhist.txt";
pub const BOX_QUALITY_HIST: &str = "bqhist.txt";
pub const GC_HIST: &str = "gchist.txt";
pub const TRIMMED_FASTQ: &str = "clean2.fq.gz";
pub const TRIM_STATS: &str = "scaffoldStats2.txt";
pub const NOVERT_FASTQ: &str = "novert.fq.gz";
pub const CLUMPED_FASTQ: &str = "clumped.fq.gz";
pub const MERGED_FASTQ: &str = "merged.fq.gz";
pub const UNMERGED_FASTQ: &str = "unmerged.fq.gz";
pub const MERGE_HIST: &str = "merge_histogram.txt";
pub const CARDINALITY: &str = "cardinality.txt";
pub const KMER_HIST: &str = "kmerhist.txt";
pub const TAXONOMY: &str = "taxonomy.txt";
pub const COVERAGE_ESTIMATE: &str = "coverage_estimate.txt";

pub const METADATA_FILE: &str = "metadata.json";
pub const FULL_RESULTS_DIR: &str = "stages";
pub const PARAMETERS_FILE: &str = "data/parameters.json";
pub const DEFAULT_PIPELINE: &str = "rqcfilter";

// Static Parameters
pub const GZIP_EXT: &str = "gz";
pub const CLEAN_TAG: &str = "rqc";
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];
pub const VERTEBRATE_DB_KMER: usize = 14;


/// Every stage the rqcfilter controller knows about. Also the closed set of stage keys
/// accepted in the parameters document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FilterContaminants,
    TrimAdaptors,
    RemoveVertebrateContaminants,
    Clumpify,
    MergeReads,
    CalculateKmerHistogram,
    AssignTaxonomy,
    EstimateCoverage,
}

/// How a tool expects its optional arguments to be spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgStyle {
    KeyValue,
    LongFlag,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::FilterContaminants,
        Stage::TrimAdaptors,
        Stage::RemoveVertebrateContaminants,
        Stage::Clumpify,
        Stage::MergeReads,
        Stage::CalculateKmerHistogram,
        Stage::AssignTaxonomy,
        Stage::EstimateCoverage,
    ];

    /// Key in the parameters document and name of the staging directory.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::FilterContaminants => "filter_contaminants",
            Stage::TrimAdaptors => "trim_adaptors",
            Stage::RemoveVertebrateContaminants => "remove_vertebrate_contaminants",
            Stage::Clumpify => "clumpify",
            Stage::MergeReads => "merge_reads",
            Stage::CalculateKmerHistogram => "calculate_kmer_histogram",
            Stage::AssignTaxonomy => "assign_taxonomy",
            Stage::EstimateCoverage => "estimate_coverage",
        }
    }

    pub fn tool(&self) -> &'static str {
        match self {
            Stage::FilterContaminants | Stage::TrimAdaptors => BBDUK_TAG,
            Stage::RemoveVertebrateContaminants => BBSPLIT_TAG,
            Stage::Clumpify => CLUMPIFY_TAG,
            Stage::MergeReads => BBMERGE_TAG,
            Stage::CalculateKmerHistogram => KHIST_TAG,
            Stage::AssignTaxonomy => SENDSKETCH_TAG,
            Stage::EstimateCoverage => COVERAGE_EST_TAG,
        }
    }

    pub fn arg_style(&self) -> ArgStyle {
        match self {
            Stage::EstimateCoverage => ArgStyle::LongFlag,
            _ => ArgStyle::KeyValue,
        }
    }

    /// Stages whose omission or fallback leaves the read chain intact.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Stage::RemoveVertebrateContaminants
                | Stage::MergeReads
                | Stage::AssignTaxonomy
                | Stage::EstimateCoverage
        )
    }

    /// The tool prints its result instead of writing a file.
    pub fn captures_stdout(&self) -> bool {
        matches!(self, Stage::EstimateCoverage)
    }

    /// The file the next stage consumes.
    pub fn declared_output(&self) -> &'static str {
        match self {
            Stage::FilterContaminants => FILTERED_FASTQ,
            Stage::TrimAdaptors => TRIMMED_FASTQ,
            Stage::RemoveVertebrateContaminants => NOVERT_FASTQ,
            Stage::Clumpify => CLUMPED_FASTQ,
            Stage::MergeReads => MERGED_FASTQ,
            Stage::CalculateKmerHistogram => KMER_HIST,
            Stage::AssignTaxonomy => TAXONOMY,
            Stage::EstimateCoverage => COVERAGE_ESTIMATE,
        }
    }

    /// All files bound on the command line (or written from captured stdout).
    pub fn output_files(&self) -> &'static [&'static str] {
        match self {
            Stage::FilterContaminants => &[
                FILTERED_FASTQ,
                FILTER_STATS,
                BASE_HIST,
                QUALITY_HIST,
                QUALITY_COUNT_HIST,
                AVG_QUALITY_HIST,
                BOX_QUALITY_HIST,
                GC_HIST,
            ],
            Stage::TrimAdaptors => &[TRIMMED_FASTQ, TRIM_STATS],
            Stage::RemoveVertebrateContaminants => &[NOVERT_FASTQ],
            Stage::Clumpify => &[CLUMPED_FASTQ],
            Stage::MergeReads => &[MERGE_HIST, CARDINALITY, MERGED_FASTQ, UNMERGED_FASTQ],
            Stage::CalculateKmerHistogram => &[KMER_HIST],
            Stage::AssignTaxonomy => &[TAXONOMY],
            Stage::EstimateCoverage => &[COVERAGE_ESTIMATE],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Directory error at {path}: {error}")]
    Directory { path: PathBuf, error: String },

    #[error("Stage {stage} failed: {diagnostics}")]
    StageExecution { stage: Stage, diagnostics: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn directory(path: impl Into<PathBuf>, error: impl fmt::Display) -> Self {
        PipelineError::Directory {
            path: path.into(),
            error: error.to_string(),
        }
    }
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub threads: usize,
}
