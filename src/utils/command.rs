// src/utils/command.rs: tool command lines and child-process launching

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::debug;
use serde::Serialize;
use tokio::process::Command;

use crate::config::defs::Stage;
use crate::config::params::ResolvedArguments;


fn binding(key: &str, path: &Path) -> String {
    format!("{}={}", key, path.to_string_lossy())
}

mod bbduk {
    use std::path::Path;
    use crate::config::defs::{
        AVG_QUALITY_HIST, BASE_HIST, BOX_QUALITY_HIST, FILTERED_FASTQ, FILTER_STATS, GC_HIST,
        QUALITY_COUNT_HIST, QUALITY_HIST, TRIMMED_FASTQ, TRIM_STATS,
    };
    use super::binding;

    pub fn filter_arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(binding("in", input));
        args_vec.push(binding("out", &outdir.join(FILTERED_FASTQ)));
        // Contaminants detected
        args_vec.push(binding("stats", &outdir.join(FILTER_STATS)));
        args_vec.push(binding("bhist", &outdir.join(BASE_HIST)));
        args_vec.push(binding("qhist", &outdir.join(QUALITY_HIST)));
        args_vec.push(binding("qchist", &outdir.join(QUALITY_COUNT_HIST)));
        args_vec.push(binding("aqhist", &outdir.join(AVG_QUALITY_HIST)));
        // For box plots
        args_vec.push(binding("bqhist", &outdir.join(BOX_QUALITY_HIST)));
        args_vec.push(binding("gchist", &outdir.join(GC_HIST)));
        args_vec
    }

    pub fn trim_arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(binding("in", input));
        args_vec.push(binding("out", &outdir.join(TRIMMED_FASTQ)));
        args_vec.push(binding("stats", &outdir.join(TRIM_STATS)));
        args_vec
    }
}

mod bbsplit {
    use std::path::Path;
    use crate::config::defs::{NOVERT_FASTQ, VERTEBRATE_DB_KMER};
    use super::binding;

    pub struct VertebrateRefs<'a> {
        pub cat: &'a Path,
        pub dog: &'a Path,
        pub mouse: &'a Path,
        pub human: &'a Path,
    }

    pub fn arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(binding("in", input));
        // Reads that hit none of the references
        args_vec.push(binding("outu", &outdir.join(NOVERT_FASTQ)));
        args_vec
    }

    pub fn build_arg_generator(refs: &VertebrateRefs, db_path: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("build=1".to_string());
        args_vec.push(format!("k={}", VERTEBRATE_DB_KMER));
        args_vec.push("usemodulo".to_string());
        args_vec.push(binding("ref_cat", refs.cat));
        args_vec.push(binding("ref_dog", refs.dog));
        args_vec.push(binding("ref_mouse", refs.mouse));
        args_vec.push(binding("ref_human", refs.human));
        args_vec.push(binding("path", db_path));
        args_vec
    }
}

mod clumpify {
    use std::path::Path;
    use crate::config::defs::CLUMPED_FASTQ;
    use super::binding;

    pub fn arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        vec![binding("in", input), binding("out", &outdir.join(CLUMPED_FASTQ))]
    }
}

mod bbmerge {
    use std::path::Path;
    use crate::config::defs::{CARDINALITY, MERGED_FASTQ, MERGE_HIST, UNMERGED_FASTQ};
    use super::binding;

    pub fn arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(binding("in", input));
        // Insert size histogram
        args_vec.push(binding("ihist", &outdir.join(MERGE_HIST)));
        args_vec.push(binding("outc", &outdir.join(CARDINALITY)));
        args_vec.push(binding("out", &outdir.join(MERGED_FASTQ)));
        args_vec.push(binding("outu", &outdir.join(UNMERGED_FASTQ)));
        args_vec
    }
}

mod khist {
    use std::path::Path;
    use crate::config::defs::KMER_HIST;
    use super::binding;

    pub fn arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        vec![binding("in", input), binding("hist", &outdir.join(KMER_HIST))]
    }
}

mod sendsketch {
    use std::path::Path;
    use crate::config::defs::TAXONOMY;
    use super::binding;

    pub fn arg_generator(input: &Path, outdir: &Path) -> Vec<String> {
        vec![binding("in", input), binding("out", &outdir.join(TAXONOMY))]
    }
}

mod coverage_est {
    use std::path::Path;

    // Result is printed to stdout
    pub fn arg_generator(histogram: &Path) -> Vec<String> {
        vec!["--input".to_string(), histogram.to_string_lossy().to_string()]
    }
}

pub use bbsplit::VertebrateRefs;

/// Required bindings for one stage: input first, then every declared output.
///
/// # Arguments
///
/// * `stage` - Stage being invoked.
/// * `input` - File the stage consumes.
/// * `outdir` - The stage's own staging directory.
///
/// # Returns
/// Vec<String> of `key=path` tokens (or flag/value pairs for coverage estimation).
pub fn generate_cli(stage: Stage, input: &Path, outdir: &Path) -> Vec<String> {
    match stage {
        Stage::FilterContaminants => bbduk::filter_arg_generator(input, outdir),
        Stage::TrimAdaptors => bbduk::trim_arg_generator(input, outdir),
        Stage::RemoveVertebrateContaminants => bbsplit::arg_generator(input, outdir),
        Stage::Clumpify => clumpify::arg_generator(input, outdir),
        Stage::MergeReads => bbmerge::arg_generator(input, outdir),
        Stage::CalculateKmerHistogram => khist::arg_generator(input, outdir),
        Stage::AssignTaxonomy => sendsketch::arg_generator(input, outdir),
        Stage::EstimateCoverage => coverage_est::arg_generator(input),
    }
}

pub fn vertebrate_db_cli(refs: &VertebrateRefs, db_path: &Path) -> Vec<String> {
    bbsplit::build_arg_generator(refs, db_path)
}


/// Maps a tool name onto the command that launches it.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    tool_dir: Option<PathBuf>,
    overrides: HashMap<String, Vec<String>>,
}

impl Toolbox {
    pub fn new(tool_dir: Option<PathBuf>) -> Self {
        Toolbox {
            tool_dir,
            overrides: HashMap::new(),
        }
    }

    /// Launch `tool` with an explicit command prefix, e.g. `["Rscript", "/opt/coverage_est.R"]`.
    pub fn with_command(mut self, tool: &str, command: Vec<String>) -> Self {
        self.overrides.insert(tool.to_string(), command);
        self
    }

    pub fn command(&self, tool: &str) -> Vec<String> {
        if let Some(command) = self.overrides.get(tool) {
            return command.clone();
        }
        match &self.tool_dir {
            Some(dir) => vec![dir.join(tool).to_string_lossy().to_string()],
            None => vec![tool.to_string()],
        }
    }
}


/// Everything needed to launch one tool.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub name: String,
    pub stage: Option<Stage>,
    pub command: Vec<String>,
    pub required: Vec<String>,
    pub options: ResolvedArguments,
    pub outdir: PathBuf,
}

impl StageInvocation {
    pub fn for_stage(
        stage: Stage,
        toolbox: &Toolbox,
        input: &Path,
        outdir: &Path,
        options: ResolvedArguments,
    ) -> Self {
        StageInvocation {
            name: stage.name().to_string(),
            stage: Some(stage),
            command: toolbox.command(stage.tool()),
            required: generate_cli(stage, input, outdir),
            options,
            outdir: outdir.to_path_buf(),
        }
    }

    /// Launcher, then required bindings, then optional arguments. Never reordered.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.extend(self.required.iter().cloned());
        argv.extend(self.options.iter().cloned());
        argv
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    ExitFailure(Option<i32>),
    LaunchFailure,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: StageStatus,
    pub stderr: String,
    pub stdout: String,
}

impl ToolOutput {
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// The tool never started, so nothing was written to the stage directory.
    pub fn not_launched(message: String) -> Self {
        ToolOutput {
            status: StageStatus::LaunchFailure,
            stderr: message,
            stdout: String::new(),
        }
    }
}


/// Runs one invocation to completion. Failures are reported in the output, never raised.
pub trait StageRunner {
    fn run(&self, invocation: &StageInvocation) -> impl Future<Output = ToolOutput> + Send;
}

/// Launches real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRunner;

impl StageRunner for ToolRunner {
    async fn run(&self, invocation: &StageInvocation) -> ToolOutput {
        let argv = invocation.argv();
        let Some((program, args)) = argv.split_first() else {
            return ToolOutput::not_launched(format!("No command configured for {}", invocation.name));
        };
        debug!("{}: {}", invocation.name, argv.join(" "));

        // output() waits for exit, so nothing is still writing into the stage directory
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) => ToolOutput {
                status: if out.status.success() {
                    StageStatus::Success
                } else {
                    StageStatus::ExitFailure(out.status.code())
                },
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            },
            Err(e) => ToolOutput::not_launched(format!("Failed to spawn {}: {}. Is it installed?", program, e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{BBDUK_TAG, COVERAGE_EST_TAG, FILTERED_FASTQ, GC_HIST};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()]
    }

    #[test]
    fn test_argv_order() {
        let toolbox = Toolbox::default();
        let options = ResolvedArguments::from(vec!["k=31".to_string(), "threads=2".to_string()]);
        let inv = StageInvocation::for_stage(
            Stage::TrimAdaptors,
            &toolbox,
            Path::new("/tmp/in.fq.gz"),
            Path::new("/tmp/run/trim_adaptors"),
            options,
        );
        assert_eq!(
            inv.argv(),
            vec![
                BBDUK_TAG.to_string(),
                "in=/tmp/in.fq.gz".to_string(),
                "out=/tmp/run/trim_adaptors/clean2.fq.gz".to_string(),
                "stats=/tmp/run/trim_adaptors/scaffoldStats2.txt".to_string(),
                "k=31".to_string(),
                "threads=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_filter_binds_every_declared_output() {
        let outdir = Path::new("/run/filter_contaminants");
        let args = generate_cli(Stage::FilterContaminants, Path::new("/in.fq"), outdir);
        assert_eq!(args[0], "in=/in.fq");
        assert_eq!(args[1], format!("out=/run/filter_contaminants/{}", FILTERED_FASTQ));
        for file in Stage::FilterContaminants.output_files() {
            assert!(args.iter().any(|a| a.ends_with(&format!("/{}", file))), "{} not bound", file);
        }
        assert!(args.last().unwrap().ends_with(GC_HIST));
    }

    #[test]
    fn test_coverage_estimate_takes_histogram_flag() {
        let args = generate_cli(Stage::EstimateCoverage, Path::new("/run/kmerhist.txt"), Path::new("/run/x"));
        assert_eq!(args, vec!["--input".to_string(), "/run/kmerhist.txt".to_string()]);
    }

    #[test]
    fn test_vertebrate_db_cli() {
        let refs = VertebrateRefs {
            cat: Path::new("/d/cat.fa.gz"),
            dog: Path::new("/d/dog.fa.gz"),
            mouse: Path::new("/d/mouse.fa.gz"),
            human: Path::new("/d/hg19.fa.gz"),
        };
        let args = vertebrate_db_cli(&refs, Path::new("/d/dogcatmousehuman"));
        assert_eq!(&args[..3], &["build=1", "k=14", "usemodulo"]);
        assert!(args.contains(&"ref_human=/d/hg19.fa.gz".to_string()));
        assert_eq!(args.last().unwrap(), "path=/d/dogcatmousehuman");
    }

    #[test]
    fn test_toolbox_resolution() {
        let toolbox = Toolbox::new(Some(PathBuf::from("/opt/bbmap")))
            .with_command(COVERAGE_EST_TAG, vec!["Rscript".to_string(), "/opt/coverage_est.R".to_string()]);
        assert_eq!(toolbox.command(BBDUK_TAG), vec!["/opt/bbmap/bbduk.sh".to_string()]);
        assert_eq!(toolbox.command(COVERAGE_EST_TAG)[0], "Rscript");
        assert_eq!(Toolbox::default().command(BBDUK_TAG), vec![BBDUK_TAG.to_string()]);
    }

    #[tokio::test]
    async fn test_runner_captures_streams() {
        let toolbox = Toolbox::default().with_command(BBDUK_TAG, sh("echo \"$1\"; echo working >&2"));
        let inv = StageInvocation::for_stage(
            Stage::Clumpify,
            &Toolbox::default(),
            Path::new("/in.fq"),
            Path::new("/out"),
            ResolvedArguments::default(),
        );
        let inv = StageInvocation { command: toolbox.command(BBDUK_TAG), ..inv };
        let output = ToolRunner.run(&inv).await;
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "in=/in.fq");
        assert_eq!(output.stderr.trim(), "working");
    }

    #[tokio::test]
    async fn test_runner_classifies_exit_failure() {
        let inv = StageInvocation {
            name: "failing".to_string(),
            stage: None,
            command: sh("echo 'Exception in thread main' >&2; exit 3"),
            required: vec![],
            options: ResolvedArguments::default(),
            outdir: PathBuf::from("/tmp"),
        };
        let output = ToolRunner.run(&inv).await;
        assert_eq!(output.status, StageStatus::ExitFailure(Some(3)));
        assert!(output.stderr.contains("Exception"));
    }

    #[tokio::test]
    async fn test_runner_classifies_launch_failure() {
        let inv = StageInvocation {
            name: "missing".to_string(),
            stage: None,
            command: vec!["/nonexistent/definitely-not-a-tool.sh".to_string()],
            required: vec![],
            options: ResolvedArguments::default(),
            outdir: PathBuf::from("/tmp"),
        };
        let output = ToolRunner.run(&inv).await;
        assert_eq!(output.status, StageStatus::LaunchFailure);
        assert!(output.stderr.contains("definitely-not-a-tool"));
    }
}
