#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};

use rqc_pipelines::config::defs::{
    PipelineError, Stage, BBDUK_TAG, BBMERGE_TAG, BBSPLIT_TAG, CLUMPIFY_TAG, COVERAGE_EST_TAG, KHIST_TAG,
    METADATA_FILE, SENDSKETCH_TAG,
};
use rqc_pipelines::config::params::{ParamBuilder, PipelineConfig};
use rqc_pipelines::pipelines::rqcfilter::{RqcFilter, RunFlags};
use rqc_pipelines::pipelines::vertebrate_db::{index_exists, ReferenceGenomes};
use rqc_pipelines::utils::command::{ToolRunner, Toolbox};
use rqc_pipelines::utils::fastq::{count_records, sort_by_name};
use rqc_pipelines::utils::metadata::RunMetadata;

const READS: &str = "@r1\nACGTACGT\n+\nIIIIIIII\n@r2\nTTGATTGA\n+\nIIIIIIII\n@r3\nGGCCGGCC\n+\nIIIIIIII\n";

// Copies in= to every FASTQ output and writes a stub for every other bound report.
// With build=1 it only creates the index directory under path=.
const FAKE_BBTOOL: &str = r##"
case " $* " in
    *" build=1 "*)
        for a in "$@"; do
            case "$a" in path=*) mkdir -p "${a#path=}/ref" ;; esac
        done
        exit 0 ;;
esac
input=""
for a in "$@"; do
    case "$a" in in=*) input="${a#in=}";; esac
done
for a in "$@"; do
    case "$a" in
        out=*.fq.gz|outu=*.fq.gz) cp "$input" "${a#*=}" ;;
        out=*|stats=*|bhist=*|qhist=*|qchist=*|aqhist=*|bqhist=*|gchist=*|ihist=*|outc=*|hist=*)
            echo "#report" > "${a#*=}" ;;
    esac
done
echo "$0 done" >&2
"##;

const FAKE_COVERAGE: &str = "echo \"coverage 12.5\"\n";

const FAILING_TOOL: &str = "echo 'java.lang.OutOfMemoryError: Java heap space' >&2\nexit 1\n";

const PARAMS: &str = r#"{
    "rqcfilter": {
        "filter_contaminants": {"ref": ["data/phix.fa.gz"], "k": 31},
        "trim_adaptors": {"adapters": "data/adapters.fa", "ktrim": "r"},
        "remove_vertebrate_contaminants": {"path": "data/dogcatmousehuman", "minid": 0.95},
        "clumpify": {"dedupe": true},
        "merge_reads": {"strict": true},
        "calculate_kmer_histogram": {"k": 31},
        "assign_taxonomy": {},
        "estimate_coverage": {"plot": "FALSE"}
    }
}"#;

struct Workspace {
    tmp: TempDir,
    input: PathBuf,
    out: PathBuf,
    scratch: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("sample.fq");
        fs::write(&input, READS).unwrap();
        let out = tmp.path().join("rqcout");
        let scratch = tmp.path().join("scratch");
        fs::create_dir(&out).unwrap();
        fs::create_dir(&scratch).unwrap();
        fs::create_dir(tmp.path().join("data")).unwrap();
        for name in ["cat.fa.gz", "dog.fa.gz", "mouse.fa.gz", "hg19.fa.gz"] {
            fs::write(tmp.path().join("data").join(name), b">chr1\nACGT\n").unwrap();
        }
        Workspace { tmp, input, out, scratch }
    }

    fn genomes(&self) -> ReferenceGenomes {
        let data = self.tmp.path().join("data");
        ReferenceGenomes {
            cat: data.join("cat.fa.gz"),
            dog: data.join("dog.fa.gz"),
            mouse: data.join("mouse.fa.gz"),
            human: data.join("hg19.fa.gz"),
        }
    }

    fn script(&self, name: &str, body: &str) -> Vec<String> {
        let path = self.tmp.path().join(name);
        fs::write(&path, body).unwrap();
        vec!["sh".to_string(), path.to_string_lossy().to_string()]
    }

    /// Every tool is a shell script; `failing` replaces one of them with a crashing script.
    fn toolbox(&self, failing: Option<&str>) -> Toolbox {
        let bbtool = self.script("fake_bbtool.sh", FAKE_BBTOOL);
        let coverage = self.script("fake_coverage.sh", FAKE_COVERAGE);
        let crash = self.script("crash.sh", FAILING_TOOL);
        let mut toolbox = Toolbox::default();
        for tag in [BBDUK_TAG, BBSPLIT_TAG, CLUMPIFY_TAG, BBMERGE_TAG, KHIST_TAG, SENDSKETCH_TAG] {
            toolbox = toolbox.with_command(tag, bbtool.clone());
        }
        toolbox = toolbox.with_command(COVERAGE_EST_TAG, coverage);
        if let Some(tag) = failing {
            toolbox = toolbox.with_command(tag, crash);
        }
        toolbox
    }

    fn controller(&self, flags: RunFlags, failing: Option<&str>) -> RqcFilter<ToolRunner> {
        let config = PipelineConfig::from_json(PARAMS).unwrap();
        let params = ParamBuilder::new(config, "rqcfilter", self.tmp.path()).unwrap().with_threads(2);
        RqcFilter::new(ToolRunner, params, self.toolbox(failing), flags).with_reference_genomes(self.genomes())
    }
}

fn names(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn summary_run_leaves_clean_reads_and_metadata() {
    let ws = Workspace::new();
    let rqc = ws.controller(RunFlags::default(), None);
    let report = rqc.execute(&ws.input, &ws.out, &ws.scratch).await.unwrap();

    assert_eq!(names(&ws.out), vec![METADATA_FILE, "sample.rqc.fq.gz"]);
    assert!(names(&ws.scratch).is_empty());
    assert_eq!(count_records(&ws.out.join("sample.rqc.fq.gz")).unwrap(), 3);

    // The fake tools pass reads through untouched
    let sorted_in = ws.tmp.path().join("in.sorted.fq.gz");
    let sorted_out = ws.tmp.path().join("out.sorted.fq.gz");
    sort_by_name(&ws.input, &sorted_in).unwrap();
    sort_by_name(&ws.out.join("sample.rqc.fq.gz"), &sorted_out).unwrap();
    assert_eq!(fs::read(&sorted_in).unwrap(), fs::read(&sorted_out).unwrap());

    let metadata = RunMetadata::from_json(&fs::read_to_string(ws.out.join(METADATA_FILE)).unwrap()).unwrap();
    assert_eq!(metadata.clean_reads, Some(3));
    assert_eq!(metadata.stages.len(), 4);
    let filter: Vec<&str> = metadata.stages["filter_contaminants"].iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        filter,
        vec![
            "filter_contaminants/aqhist.txt",
            "filter_contaminants/bhist.txt",
            "filter_contaminants/bqhist.txt",
            "filter_contaminants/clean1.fq.gz",
            "filter_contaminants/gchist.txt",
            "filter_contaminants/qchist.txt",
            "filter_contaminants/qhist.txt",
            "filter_contaminants/scaffoldStats1.txt",
        ]
    );
    assert!(report.results.iter().all(|r| r.diagnostics.contains("done")));
}

#[tokio::test]
async fn full_run_keeps_every_stage_directory() {
    let ws = Workspace::new();
    let flags = RunFlags {
        remove_vertebrates: true,
        paired: true,
        assign_taxonomy: true,
        estimate_coverage: true,
        keep_full_results: true,
        ..Default::default()
    };
    let db_path = ws.tmp.path().join("data").join("dogcatmousehuman");
    assert!(!index_exists(&db_path));
    let rqc = ws.controller(flags, None);
    let report = rqc.execute(&ws.input, &ws.out, &ws.scratch).await.unwrap();

    assert!(index_exists(&db_path));
    assert_eq!(names(&ws.out), vec![METADATA_FILE, "stages"]);
    let mut expected: Vec<String> = Stage::ALL.iter().map(|s| s.name().to_string()).collect();
    expected.sort();
    assert_eq!(names(&ws.out.join("stages")), expected);

    let coverage = fs::read_to_string(ws.out.join("stages/estimate_coverage/coverage_estimate.txt")).unwrap();
    assert_eq!(coverage.trim(), "coverage 12.5");
    assert_eq!(
        names(&ws.out.join("stages/merge_reads")),
        vec!["cardinality.txt", "merge_histogram.txt", "merged.fq.gz", "unmerged.fq.gz"]
    );
    assert_eq!(report.stages(), Stage::ALL.to_vec());
    assert_eq!(report.metadata.unwrap().stages.len(), Stage::ALL.len());
}

#[tokio::test]
async fn crashing_tool_stops_the_run_and_keeps_the_tree() {
    let ws = Workspace::new();
    let flags = RunFlags {
        paired: true,
        ..Default::default()
    };
    let rqc = ws.controller(flags, Some(CLUMPIFY_TAG));
    let err = rqc.execute(&ws.input, &ws.out, &ws.scratch).await.unwrap_err();
    match err {
        PipelineError::StageExecution { stage, diagnostics } => {
            assert_eq!(stage, Stage::Clumpify);
            assert!(diagnostics.contains("exited with status 1"));
            assert!(diagnostics.contains("OutOfMemoryError"));
        }
        other => panic!("unexpected error {:?}", other),
    }

    let kept = names(&ws.scratch);
    assert_eq!(kept.len(), 1);
    assert!(kept[0].starts_with("rqc_"));
    assert_eq!(
        names(&ws.scratch.join(&kept[0])),
        vec!["clumpify", "filter_contaminants", "trim_adaptors"]
    );
    assert!(names(&ws.out).is_empty());
}

#[tokio::test]
async fn missing_tool_is_a_launch_failure() {
    let ws = Workspace::new();
    let config = PipelineConfig::from_json(PARAMS).unwrap();
    let params = ParamBuilder::new(config, "rqcfilter", ws.tmp.path()).unwrap();
    let toolbox = Toolbox::new(Some(ws.tmp.path().join("no-such-bin")));
    let flags = RunFlags {
        cleanup_on_failure: true,
        ..Default::default()
    };
    let rqc = RqcFilter::new(ToolRunner, params, toolbox, flags);
    let err = rqc.execute(&ws.input, &ws.out, &ws.scratch).await.unwrap_err();
    match err {
        PipelineError::StageExecution { stage, diagnostics } => {
            assert_eq!(stage, Stage::FilterContaminants);
            assert!(diagnostics.contains("could not be launched"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(names(&ws.scratch).is_empty());
}
