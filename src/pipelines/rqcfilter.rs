// src/pipelines/rqcfilter.rs: the staged rqcfilter workflow

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use log::{debug, error, info, warn};

use crate::cli::{Arguments, HistogramInput, OptionalFailurePolicy};
use crate::config::defs::{
    PipelineError, RunConfig, Stage, CLUMPED_FASTQ, FILTERED_FASTQ, FULL_RESULTS_DIR, KMER_HIST,
    MERGED_FASTQ, METADATA_FILE, NOVERT_FASTQ, PARAMETERS_FILE, TRIMMED_FASTQ, UNMERGED_FASTQ,
};
use crate::config::params::{ParamBuilder, PathOption, PipelineConfig, ResolvedArguments};
use crate::pipelines::vertebrate_db::{ensure_vertebrate_db, index_exists, DbStatus, ReferenceGenomes};
use crate::utils::command::{StageInvocation, StageRunner, StageStatus, ToolOutput, ToolRunner, Toolbox};
use crate::utils::fastq::{count_records, SampleFile};
use crate::utils::file::clean_file_name;
use crate::utils::metadata::{aggregate, list_stage_files, FileRecord, RunMetadata};
use crate::utils::staging::StagingTree;
use crate::utils::system::get_temp_dir;


/// Switches fixed for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunFlags {
    pub remove_vertebrates: bool,
    pub paired: bool,
    pub assign_taxonomy: bool,
    pub estimate_coverage: bool,
    pub keep_full_results: bool,
    pub keep_merge_results: bool,
    pub histogram_input: HistogramInput,
    pub optional_failure: OptionalFailurePolicy,
    pub cleanup_on_failure: bool,
    pub checksums: bool,
}

impl From<&Arguments> for RunFlags {
    fn from(args: &Arguments) -> Self {
        RunFlags {
            remove_vertebrates: args.remove_vertebrates,
            paired: args.paired,
            assign_taxonomy: args.assign_taxonomy,
            estimate_coverage: args.estimate_coverage,
            keep_full_results: args.keep_full_results,
            keep_merge_results: args.keep_merge_results,
            histogram_input: args.histogram_input,
            optional_failure: args.optional_failure,
            cleanup_on_failure: args.cleanup_on_failure,
            checksums: args.checksums,
        }
    }
}


/// Transition function of the stage graph. `None` as input means the run has not started,
/// `None` as output means every stage is done.
pub fn next_stage(current: Option<Stage>, flags: &RunFlags) -> Option<Stage> {
    match current {
        None => Some(Stage::FilterContaminants),
        Some(Stage::FilterContaminants) => Some(Stage::TrimAdaptors),
        Some(Stage::TrimAdaptors) if flags.remove_vertebrates => Some(Stage::RemoveVertebrateContaminants),
        Some(Stage::TrimAdaptors) | Some(Stage::RemoveVertebrateContaminants) => Some(Stage::Clumpify),
        Some(Stage::Clumpify) if flags.paired => Some(Stage::MergeReads),
        Some(Stage::Clumpify) | Some(Stage::MergeReads) => Some(Stage::CalculateKmerHistogram),
        Some(Stage::CalculateKmerHistogram) if flags.assign_taxonomy => Some(Stage::AssignTaxonomy),
        Some(Stage::CalculateKmerHistogram) | Some(Stage::AssignTaxonomy) if flags.estimate_coverage => {
            Some(Stage::EstimateCoverage)
        }
        Some(Stage::CalculateKmerHistogram) | Some(Stage::AssignTaxonomy) | Some(Stage::EstimateCoverage) => None,
    }
}

/// Every stage a run with `flags` reaches, in execution order.
pub fn stage_plan(flags: &RunFlags) -> Vec<Stage> {
    let mut plan = Vec::new();
    let mut current = next_stage(None, flags);
    while let Some(stage) = current {
        plan.push(stage);
        current = next_stage(Some(stage), flags);
    }
    plan
}


#[derive(Debug)]
pub enum PipelineState {
    Running(Stage),
    Finalizing,
    Done(RunReport),
    Failed { stage: Stage, diagnostics: String },
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub diagnostics: String,
    pub stdout: String,
    pub files: Vec<FileRecord>,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Success
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<StageResult>,
    pub fallbacks: Vec<Stage>,
    /// Final clean reads: the copied clean FASTQ, or the clumped output inside the retained tree.
    pub clean_output: PathBuf,
    /// Where the full staging tree ended up when it was kept.
    pub retained: Option<PathBuf>,
    pub metadata: Option<RunMetadata>,
    pub metadata_error: Option<String>,
}

impl RunReport {
    pub fn stages(&self) -> Vec<Stage> {
        self.results.iter().map(|r| r.stage).collect()
    }
}


/// Mutable bookkeeping of one run. Only the controller touches it.
struct RunState {
    input: SampleFile,
    clean_name: String,
    arguments: BTreeMap<Stage, ResolvedArguments>,
    tree: Option<StagingTree>,
    results: Vec<StageResult>,
    fallbacks: Vec<Stage>,
}

impl RunState {
    fn tree(&mut self) -> Result<&mut StagingTree, PipelineError> {
        self.tree
            .as_mut()
            .ok_or_else(|| PipelineError::Other(anyhow!("Staging tree already disposed")))
    }

    /// Declared output of `stage`, if it ran and succeeded.
    fn produced(&self, stage: Stage, file: &str) -> Option<PathBuf> {
        let succeeded = self.results.iter().any(|r| r.stage == stage && r.succeeded());
        let dir = self.tree.as_ref()?.stage_dir(stage)?;
        succeeded.then(|| dir.join(file))
    }
}


pub struct RqcFilter<R: StageRunner> {
    runner: R,
    params: ParamBuilder,
    toolbox: Toolbox,
    flags: RunFlags,
    genomes: Option<ReferenceGenomes>,
}

impl<R: StageRunner> RqcFilter<R> {
    pub fn new(runner: R, params: ParamBuilder, toolbox: Toolbox, flags: RunFlags) -> Self {
        RqcFilter {
            runner,
            params,
            toolbox,
            flags,
            genomes: None,
        }
    }

    /// Genomes used to build the vertebrate index when a run needs it and it is missing.
    pub fn with_reference_genomes(mut self, genomes: ReferenceGenomes) -> Self {
        self.genomes = Some(genomes);
        self
    }

    pub fn plan(&self) -> Vec<Stage> {
        stage_plan(&self.flags)
    }

    /// Drives one FASTQ through every planned stage.
    ///
    /// # Arguments
    ///
    /// * `input` - FASTQ to clean.
    /// * `out_dir` - Existing output directory.
    /// * `temp_parent` - Directory the staging tree is created under.
    ///
    /// # Returns
    /// RunReport on success. A failed stage ends the run with `PipelineError::StageExecution`.
    pub async fn execute(
        &self,
        input: &Path,
        out_dir: &Path,
        temp_parent: &Path,
    ) -> Result<RunReport, PipelineError> {
        let plan = self.plan();
        info!(
            "Stage plan: {}",
            plan.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
        );

        // Arguments for every stage up front, so a bad document never launches anything
        let arguments = plan
            .iter()
            .map(|stage| self.params.build(*stage).map(|args| (*stage, args)))
            .collect::<Result<BTreeMap<_, _>, PipelineError>>()?;

        let input = SampleFile::new(input)?;
        let clean_name = clean_file_name(input.path(), &[])?;
        if !out_dir.is_dir() {
            return Err(PipelineError::directory(out_dir, "Output directory does not exist"));
        }

        let mut run = RunState {
            input,
            clean_name,
            arguments,
            tree: Some(StagingTree::create(temp_parent)?),
            results: Vec::new(),
            fallbacks: Vec::new(),
        };

        let mut state = match plan.first() {
            Some(stage) => PipelineState::Running(*stage),
            None => PipelineState::Finalizing,
        };
        loop {
            state = match state {
                PipelineState::Running(stage) => match self.step(stage, &mut run).await {
                    Ok(next) => next,
                    Err(e) => {
                        self.abandon(&mut run);
                        return Err(e);
                    }
                },
                PipelineState::Finalizing => match self.finalize(&mut run, out_dir) {
                    Ok(report) => PipelineState::Done(report),
                    Err(e) => {
                        self.abandon(&mut run);
                        return Err(e);
                    }
                },
                PipelineState::Done(report) => return Ok(report),
                PipelineState::Failed { stage, diagnostics } => {
                    error!("Stage {} failed: {}", stage, diagnostics);
                    self.abandon(&mut run);
                    return Err(PipelineError::StageExecution { stage, diagnostics });
                }
            };
        }
    }

    fn stage_input(&self, stage: Stage, run: &RunState) -> Option<PathBuf> {
        let clumped = || run.produced(Stage::Clumpify, CLUMPED_FASTQ);
        match stage {
            Stage::FilterContaminants => Some(run.input.path().to_path_buf()),
            Stage::TrimAdaptors => run.produced(Stage::FilterContaminants, FILTERED_FASTQ),
            Stage::RemoveVertebrateContaminants => run.produced(Stage::TrimAdaptors, TRIMMED_FASTQ),
            Stage::Clumpify => run
                .produced(Stage::RemoveVertebrateContaminants, NOVERT_FASTQ)
                .or_else(|| run.produced(Stage::TrimAdaptors, TRIMMED_FASTQ)),
            Stage::MergeReads | Stage::AssignTaxonomy => clumped(),
            Stage::CalculateKmerHistogram => {
                let merged = match self.flags.histogram_input {
                    HistogramInput::Merged => run.produced(Stage::MergeReads, MERGED_FASTQ),
                    HistogramInput::Unmerged => run.produced(Stage::MergeReads, UNMERGED_FASTQ),
                    HistogramInput::Clumped => None,
                };
                merged.or_else(clumped)
            }
            Stage::EstimateCoverage => run.produced(Stage::CalculateKmerHistogram, KMER_HIST),
        }
    }

    async fn step(&self, stage: Stage, run: &mut RunState) -> Result<PipelineState, PipelineError> {
        let started = Instant::now();
        let input = self
            .stage_input(stage, run)
            .ok_or_else(|| PipelineError::Other(anyhow!("No input available for stage {}", stage)))?;
        let options = run.arguments.get(&stage).cloned().unwrap_or_default();
        let dir = run.tree()?.create_stage_dir(stage)?;

        let sample = SampleFile::new(&input)?;
        let output = if !sample.exists() {
            ToolOutput::not_launched(format!("Input {} does not exist", sample))
        } else if let Some(failed) = self.prepare(stage).await? {
            failed
        } else {
            let invocation = StageInvocation::for_stage(stage, &self.toolbox, sample.path(), &dir, options);
            info!("Running {} on {}", stage, sample.file_name());
            self.runner.run(&invocation).await
        };

        if !output.stderr.is_empty() {
            debug!("{} stderr:\n{}", stage, output.stderr.trim_end());
        }
        if stage.captures_stdout() && output.is_success() {
            let path = dir.join(stage.declared_output());
            fs::write(&path, &output.stdout).map_err(|e| PipelineError::directory(&path, e))?;
        }

        let root = run.tree()?.root().to_path_buf();
        // Hashing is left to the final aggregation
        let files = list_stage_files(&root, &dir, false).unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::new()
        });

        let result = StageResult {
            stage,
            status: output.status,
            diagnostics: output.stderr,
            stdout: output.stdout,
            files,
        };
        info!(
            "{} finished: {:?}, {} files in {} ms",
            stage,
            result.status,
            result.files.len(),
            started.elapsed().as_millis()
        );
        let succeeded = result.succeeded();
        let diagnostics = summarize_failure(&result);
        run.results.push(result);

        if !succeeded {
            if stage.is_optional() && self.flags.optional_failure == OptionalFailurePolicy::Fallback {
                warn!("Optional stage {} failed, continuing without it: {}", stage, diagnostics);
                run.fallbacks.push(stage);
            } else {
                return Ok(PipelineState::Failed { stage, diagnostics });
            }
        }

        Ok(match next_stage(Some(stage), &self.flags) {
            Some(next) => PipelineState::Running(next),
            None => PipelineState::Finalizing,
        })
    }

    /// Work a stage depends on before it can launch. A returned output stands in for the
    /// stage's own and goes through the same failure policy.
    async fn prepare(&self, stage: Stage) -> Result<Option<ToolOutput>, PipelineError> {
        if stage != Stage::RemoveVertebrateContaminants {
            return Ok(None);
        }
        let Some(db_path) = self.params.path_option(stage, PathOption::Path)? else {
            debug!("No database path set for {}, leaving it to bbsplit", stage);
            return Ok(None);
        };
        let Some(genomes) = &self.genomes else {
            return Ok((!index_exists(&db_path)).then(|| {
                ToolOutput::not_launched(format!(
                    "Vertebrate database {} is missing and no reference genomes were given",
                    db_path.display()
                ))
            }));
        };
        Ok(match ensure_vertebrate_db(&self.runner, &self.toolbox, genomes, &db_path).await? {
            DbStatus::Present | DbStatus::Built => None,
            DbStatus::Failed(mut output) => {
                output.stderr = format!("Vertebrate database build failed: {}", output.stderr.trim());
                Some(output)
            }
        })
    }

    fn finalize(&self, run: &mut RunState, out_dir: &Path) -> Result<RunReport, PipelineError> {
        let clumped = run
            .produced(Stage::Clumpify, CLUMPED_FASTQ)
            .ok_or_else(|| PipelineError::Other(anyhow!("Clumpify produced no output")))?;
        let merge_outputs = match (
            run.produced(Stage::MergeReads, MERGED_FASTQ),
            run.produced(Stage::MergeReads, UNMERGED_FASTQ),
        ) {
            (Some(merged), Some(unmerged)) => Some((merged, unmerged)),
            _ => None,
        };

        let (clean_output, retained, stages) = if self.flags.keep_full_results {
            let tree = run
                .tree
                .take()
                .ok_or_else(|| PipelineError::Other(anyhow!("Staging tree already disposed")))?;
            let old_root = tree.root().to_path_buf();
            let new_root = tree.retain_into(&out_dir.join(FULL_RESULTS_DIR))?;
            let clean = new_root.join(clumped.strip_prefix(&old_root).unwrap_or(clumped.as_path()));
            let stages = aggregate(&new_root, self.flags.checksums);
            (clean, Some(new_root), stages)
        } else {
            let clean = out_dir.join(&run.clean_name);
            copy_file(&clumped, &clean)?;
            if self.flags.keep_merge_results {
                if let Some((merged, unmerged)) = &merge_outputs {
                    copy_file(merged, &out_dir.join(clean_file_name(run.input.path(), &["merged"])?))?;
                    copy_file(unmerged, &out_dir.join(clean_file_name(run.input.path(), &["unmerged"])?))?;
                }
            }
            let root = run.tree()?.root().to_path_buf();
            let stages = aggregate(&root, self.flags.checksums);
            if let Some(tree) = run.tree.take() {
                tree.discard()?;
            }
            (clean, None, stages)
        };

        let clean_reads = match count_records(&clean_output) {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Could not count clean reads: {}", e);
                None
            }
        };

        let (metadata, metadata_error) = match stages {
            Ok(stages) => {
                let metadata = RunMetadata {
                    pipeline: self.params.pipeline().to_string(),
                    input: run.input.file_name().to_string(),
                    stages,
                    clean_reads,
                    fallbacks: run.fallbacks.iter().map(|s| s.name().to_string()).collect(),
                };
                match metadata.write(&out_dir.join(METADATA_FILE)) {
                    Ok(()) => (Some(metadata), None),
                    Err(e) => {
                        warn!("{}", e);
                        (Some(metadata), Some(e.to_string()))
                    }
                }
            }
            Err(e) => {
                warn!("{}", e);
                (None, Some(e.to_string()))
            }
        };

        info!("Clean reads written to {}", clean_output.display());
        Ok(RunReport {
            results: std::mem::take(&mut run.results),
            fallbacks: std::mem::take(&mut run.fallbacks),
            clean_output,
            retained,
            metadata,
            metadata_error,
        })
    }

    /// Disposes of the staging tree after a failure.
    fn abandon(&self, run: &mut RunState) {
        let Some(tree) = run.tree.take() else {
            return;
        };
        if self.flags.cleanup_on_failure {
            if let Err(e) = tree.discard() {
                warn!("Could not remove staging directory: {}", e);
            }
        } else {
            let kept = tree.persist();
            error!("Intermediate files kept for inspection in {}", kept.display());
        }
    }
}

fn summarize_failure(result: &StageResult) -> String {
    let detail = result.diagnostics.trim();
    let status = match &result.status {
        StageStatus::Success => return String::new(),
        StageStatus::ExitFailure(Some(code)) => format!("exited with status {}", code),
        StageStatus::ExitFailure(None) => "terminated by signal".to_string(),
        StageStatus::LaunchFailure => "could not be launched".to_string(),
    };
    if detail.is_empty() {
        status
    } else {
        format!("{}: {}", status, detail)
    }
}

fn copy_file(src: &Path, dest: &Path) -> Result<(), PipelineError> {
    fs::copy(src, dest).map_err(|e| PipelineError::directory(dest, e))?;
    Ok(())
}


/// Entry point for `--module rqcfilter`.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let fastq = args
        .fastq
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidInput("A FASTQ file is required (-f)".to_string()))?;
    let input = config.cwd.join(fastq);

    let parameters = match &args.parameters {
        Some(path) => config.cwd.join(path),
        None => config.root.join(PARAMETERS_FILE),
    };
    info!("Loading parameters from {}", parameters.display());
    let params = ParamBuilder::new(PipelineConfig::from_path(&parameters)?, &args.pipeline, &config.root)?
        .with_threads(config.threads);

    let toolbox = Toolbox::new(args.tool_dir.as_ref().map(PathBuf::from));
    let temp_parent = get_temp_dir(args.temp_dir.as_deref().map(Path::new));

    let controller = RqcFilter::new(ToolRunner, params, toolbox, RunFlags::from(args))
        .with_reference_genomes(ReferenceGenomes::from_args(args, &config.root));
    let report = controller.execute(&input, &config.out_dir, &temp_parent).await?;

    for fallback in &report.fallbacks {
        warn!("Optional stage {} was skipped after failing", fallback);
    }
    if let Some(e) = &report.metadata_error {
        warn!("Metadata incomplete: {}", e);
    }
    info!(
        "rqcfilter finished {} stages; results in {}",
        report.results.len(),
        config.out_dir.display()
    );
    Ok(())
}
