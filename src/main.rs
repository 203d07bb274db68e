use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{self, LevelFilter, debug, error, info};

use rqc_pipelines::cli::{self, Arguments};
use rqc_pipelines::config::defs::{PipelineError, RunConfig};
use rqc_pipelines::pipelines::{rqcfilter, vertebrate_db};
use rqc_pipelines::utils::file::prepare_output_dir;
use rqc_pipelines::utils::system::detect_threads;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n RQC\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let root = resolve_root(&args, &dir);
    debug!("Reference root is {:?}", root);

    let threads = detect_threads(args.threads);

    let module = args.module.clone();
    let out_dir = dir.join(&args.output);
    if module == "rqcfilter" {
        if let Err(e) = prepare_output_dir(&out_dir, args.overwrite) {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let run_config = Arc::new(RunConfig {
        cwd: dir,
        root,
        out_dir,
        args,
        threads,
    });

    if let Err(e) = match module.as_str() {
        "rqcfilter" => rqcfilter::run(run_config).await,
        "build_vertebrate_db" => vertebrate_db::run(run_config).await,
        _ => Err(PipelineError::Configuration(format!("Invalid module: {}", module))),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Directory reference paths in the parameters file are resolved against.
/// `--root` when given, otherwise the directory the crate was built from.
fn resolve_root(args: &Arguments, cwd: &Path) -> PathBuf {
    match &args.root {
        Some(root) => cwd.join(root),
        None => PathBuf::from(env!("CARGO_MANIFEST_DIR")),
    }
}
