use clap::{Parser, ValueEnum};

/// Which merge output feeds the k-mer histogram when reads were merged.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum HistogramInput {
    #[default]
    Merged,
    Unmerged,
    Clumped,
}

/// What happens when an optional stage (vertebrate removal, merging, taxonomy, coverage) fails.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum OptionalFailurePolicy {
    #[default]
    Abort,
    Fallback,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rqc-pipelines", version, about = "A rolling quality control and metadata collection workflow for FASTQ files")]
pub struct Arguments {

    #[arg(long, default_value = "rqcfilter", help = "rqcfilter | build_vertebrate_db")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'f', long = "fastq", help = "A .fastq, .fq, .fastq.gz or .fq.gz file.")]
    pub fastq: Option<String>,

    #[arg(short = 'o', long = "output", default_value = "rqcout")]
    pub output: String,

    #[arg(short = 'w', long, help = "Overwrite the output directory if it exists")]
    pub overwrite: bool,

    #[arg(short = 'r', long = "removevertebrates", help = "Map reads against masked human, cat, dog and mouse genomes and drop hits")]
    pub remove_vertebrates: bool,

    #[arg(short = 'p', long, help = "The FASTQ file is paired and interleaved; merge read pairs")]
    pub paired: bool,

    #[arg(short = 'm', long = "keepmergeresults", help = "Keep FASTQ files with merged and unmerged reads")]
    pub keep_merge_results: bool,

    #[arg(short = 'k', long = "keepfullresults", help = "Keep all intermediate files, not only the clean FASTQ and metadata")]
    pub keep_full_results: bool,

    #[arg(long = "assigntaxonomy", help = "Estimate taxonomic composition with sendsketch")]
    pub assign_taxonomy: bool,

    #[arg(long = "estimatecoverage", help = "Extrapolate k-mer coverage from the k-mer histogram")]
    pub estimate_coverage: bool,

    #[arg(long = "histogram-input", default_value = "merged", value_enum)]
    pub histogram_input: HistogramInput,

    #[arg(long = "optional-failure", default_value = "abort", value_enum)]
    pub optional_failure: OptionalFailurePolicy,

    #[arg(long, help = "Delete the staging directories when a stage fails instead of keeping them for inspection")]
    pub cleanup_on_failure: bool,

    #[arg(long, help = "Record a SHA-256 for every file in metadata.json")]
    pub checksums: bool,

    #[arg(short = 't', long, default_value_t = 16)]
    pub threads: usize,

    #[arg(short = 'd', long = "root", help = "Directory reference paths in the parameters file are resolved against. Defaults to the install directory.")]
    pub root: Option<String>,

    #[arg(long = "parameters", help = "Parameters JSON. Defaults to <root>/data/parameters.json")]
    pub parameters: Option<String>,

    #[arg(long, default_value = "rqcfilter")]
    pub pipeline: String,

    #[arg(long = "tool-dir", help = "Directory holding the BBTools scripts; PATH lookup otherwise")]
    pub tool_dir: Option<String>,

    #[arg(long = "tmpdir", help = "Parent for the run's staging directory. Defaults to the system temp dir")]
    pub temp_dir: Option<String>,

    #[arg(long, default_value = "data/cat.fa.gz")]
    pub cat: String,

    #[arg(long, default_value = "data/dog.fa.gz")]
    pub dog: String,

    #[arg(long, default_value = "data/mouse.fa.gz")]
    pub mouse: String,

    #[arg(long, default_value = "data/hg19.fa.gz")]
    pub human: String,

    #[arg(long = "vertebrate-db", default_value = "data/dogcatmousehuman")]
    pub vertebrate_db: String,
}
