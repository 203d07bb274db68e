// src/pipelines/vertebrate_db.rs: one-off build of the bbsplit vertebrate index

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::cli::Arguments;
use crate::config::defs::{PipelineError, RunConfig, Stage, BBSPLIT_TAG};
use crate::config::params::{resolve_path, ResolvedArguments};
use crate::utils::command::{
    vertebrate_db_cli, StageInvocation, StageRunner, ToolOutput, ToolRunner, Toolbox, VertebrateRefs,
};


/// Masked genomes the index is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceGenomes {
    pub cat: PathBuf,
    pub dog: PathBuf,
    pub mouse: PathBuf,
    pub human: PathBuf,
}

impl ReferenceGenomes {
    /// `--cat`, `--dog`, `--mouse` and `--human`, resolved against the data root.
    pub fn from_args(args: &Arguments, root: &Path) -> Self {
        ReferenceGenomes {
            cat: resolve_path(root, &args.cat),
            dog: resolve_path(root, &args.dog),
            mouse: resolve_path(root, &args.mouse),
            human: resolve_path(root, &args.human),
        }
    }

    pub fn refs(&self) -> VertebrateRefs<'_> {
        VertebrateRefs {
            cat: &self.cat,
            dog: &self.dog,
            mouse: &self.mouse,
            human: &self.human,
        }
    }

    fn missing(&self) -> Option<&Path> {
        [&self.cat, &self.dog, &self.mouse, &self.human]
            .into_iter()
            .find(|path| !path.is_file())
            .map(PathBuf::as_path)
    }
}


/// bbsplit writes its index under `<path>/ref`.
pub fn index_exists(db_path: &Path) -> bool {
    db_path.join("ref").is_dir()
}

#[derive(Debug)]
pub enum DbStatus {
    Present,
    Built,
    /// bbsplit failed or could not be launched.
    Failed(ToolOutput),
}

/// Makes sure the masked cat/dog/mouse/human index exists, building it when it does not.
///
/// # Arguments
///
/// * `runner` - Launches bbsplit.sh.
/// * `toolbox` - Resolves the bbsplit.sh command.
/// * `genomes` - Reference FASTA files.
/// * `db_path` - Directory the index is written to.
///
/// # Returns
/// DbStatus. Only a failure to create `db_path` is an error; tool failures come back as `Failed`.
pub async fn ensure_vertebrate_db<R: StageRunner>(
    runner: &R,
    toolbox: &Toolbox,
    genomes: &ReferenceGenomes,
    db_path: &Path,
) -> Result<DbStatus, PipelineError> {
    if index_exists(db_path) {
        info!("Vertebrate database already present at {}, skipping build", db_path.display());
        return Ok(DbStatus::Present);
    }
    if let Some(missing) = genomes.missing() {
        return Ok(DbStatus::Failed(ToolOutput::not_launched(format!(
            "Reference {} does not exist",
            missing.display()
        ))));
    }
    std::fs::create_dir_all(db_path).map_err(|e| PipelineError::directory(db_path, e))?;

    let invocation = StageInvocation {
        name: "build_vertebrate_db".to_string(),
        stage: None,
        command: toolbox.command(BBSPLIT_TAG),
        required: vertebrate_db_cli(&genomes.refs(), db_path),
        options: ResolvedArguments::default(),
        outdir: db_path.to_path_buf(),
    };
    info!("Building vertebrate database in {}", db_path.display());
    let output = runner.run(&invocation).await;
    Ok(if output.is_success() {
        DbStatus::Built
    } else {
        DbStatus::Failed(output)
    })
}

/// Standalone build: true when an index was built, false when one already existed.
pub async fn build_vertebrate_db<R: StageRunner>(
    runner: &R,
    toolbox: &Toolbox,
    genomes: &ReferenceGenomes,
    db_path: &Path,
) -> Result<bool, PipelineError> {
    match ensure_vertebrate_db(runner, toolbox, genomes, db_path).await? {
        DbStatus::Present => Ok(false),
        DbStatus::Built => Ok(true),
        DbStatus::Failed(output) => Err(PipelineError::StageExecution {
            stage: Stage::RemoveVertebrateContaminants,
            diagnostics: format!("Database build failed ({:?}): {}", output.status, output.stderr.trim()),
        }),
    }
}


/// Entry point for `--module build_vertebrate_db`.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let args = &config.args;
    let genomes = ReferenceGenomes::from_args(args, &config.root);
    let db_path = resolve_path(&config.root, &args.vertebrate_db);
    let toolbox = Toolbox::new(args.tool_dir.as_ref().map(PathBuf::from));

    if build_vertebrate_db(&ToolRunner, &toolbox, &genomes, &db_path).await? {
        info!("Vertebrate database written to {}", db_path.display());
    }
    Ok(())
}
