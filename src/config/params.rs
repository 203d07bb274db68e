// src/config/params.rs: parameters document -> per-stage argument lists

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::defs::{ArgStyle, PipelineError, Stage};


/// Option names whose values are reference files, resolved against the data root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOption {
    Ref,
    Adapters,
    Path,
}

impl PathOption {
    pub const ALL: [PathOption; 3] = [PathOption::Ref, PathOption::Adapters, PathOption::Path];

    pub fn key(self) -> &'static str {
        match self {
            PathOption::Ref => "ref",
            PathOption::Adapters => "adapters",
            PathOption::Path => "path",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|option| option.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<String>),
}

/// Options of one stage in the order the document lists them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Map<String, serde_json::Value>")]
pub struct StageOptions(Vec<(String, OptionValue)>);

impl StageOptions {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.iter().find(|(k, _)| *k == key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

// serde_json is built with preserve_order, so the map iterates in document order
impl TryFrom<serde_json::Map<String, serde_json::Value>> for StageOptions {
    type Error = serde_json::Error;

    fn try_from(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(key, value)| serde_json::from_value(value).map(|value| (key, value)))
            .collect::<Result<Vec<_>, _>>()
            .map(StageOptions)
    }
}

/// pipeline id -> stage -> option -> value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    pipelines: BTreeMap<String, BTreeMap<Stage, StageOptions>>,
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "Could not read parameters file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text).map_err(|e| match e {
            PipelineError::Configuration(msg) => {
                PipelineError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text)
            .map_err(|e| PipelineError::Configuration(format!("Malformed parameters document: {}", e)))
    }

    pub fn stage_options(&self, pipeline: &str, stage: Stage) -> Result<&StageOptions, PipelineError> {
        let stages = self.pipelines.get(pipeline).ok_or_else(|| {
            PipelineError::Configuration(format!("No pipeline named '{}' in parameters", pipeline))
        })?;
        stages.get(&stage).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "Pipeline '{}' has no parameters for stage '{}'",
                pipeline, stage
            ))
        })
    }

    pub fn has_pipeline(&self, pipeline: &str) -> bool {
        self.pipelines.contains_key(pipeline)
    }
}


/// Ordered optional tokens for one stage. Required file bindings are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArguments(Vec<String>);

impl ResolvedArguments {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for ResolvedArguments {
    fn from(tokens: Vec<String>) -> Self {
        ResolvedArguments(tokens)
    }
}


/// Joins a reference path onto the data root. Absolute paths come back unchanged.
pub fn resolve_path(root: &Path, value: &str) -> PathBuf {
    root.join(value)
}


pub struct ParamBuilder {
    config: PipelineConfig,
    pipeline: String,
    root: PathBuf,
    threads: Option<usize>,
}

impl ParamBuilder {
    /// # Arguments
    ///
    /// * `config` - Loaded parameters document.
    /// * `pipeline` - Top-level pipeline id to read stages from.
    /// * `root` - Fixed directory reference paths are resolved against.
    ///
    /// # Returns
    /// ParamBuilder, or a Configuration error when the pipeline id is absent.
    pub fn new(config: PipelineConfig, pipeline: &str, root: &Path) -> Result<Self, PipelineError> {
        if !config.has_pipeline(pipeline) {
            return Err(PipelineError::Configuration(format!(
                "No pipeline named '{}' in parameters",
                pipeline
            )));
        }
        Ok(ParamBuilder {
            config,
            pipeline: pipeline.to_string(),
            root: root.to_path_buf(),
            threads: None,
        })
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Resolved value of a path-like option of `stage`. For a list, the first entry.
    pub fn path_option(&self, stage: Stage, option: PathOption) -> Result<Option<PathBuf>, PipelineError> {
        let options = self.config.stage_options(&self.pipeline, stage)?;
        Ok(match options.get(option.key()) {
            Some(OptionValue::Text(path)) => Some(resolve_path(&self.root, path)),
            Some(OptionValue::List(paths)) => paths.first().map(|path| resolve_path(&self.root, path)),
            _ => None,
        })
    }

    pub fn build(&self, stage: Stage) -> Result<ResolvedArguments, PipelineError> {
        let options = self.config.stage_options(&self.pipeline, stage)?;
        let style = stage.arg_style();

        let mut tokens = Vec::new();
        for (key, value) in options.iter() {
            tokens.extend(self.render(style, key, value)?);
        }

        if let (ArgStyle::KeyValue, Some(threads)) = (style, self.threads) {
            if !options.contains_key("threads") {
                tokens.push(format!("threads={}", threads));
            }
        }
        Ok(ResolvedArguments(tokens))
    }

    fn render(&self, style: ArgStyle, key: &str, value: &OptionValue) -> Result<Vec<String>, PipelineError> {
        let rendered = match (PathOption::from_key(key), value) {
            (Some(_), OptionValue::Text(path)) => {
                resolve_path(&self.root, path).to_string_lossy().to_string()
            }
            (Some(_), OptionValue::List(paths)) => paths
                .iter()
                .map(|p| resolve_path(&self.root, p).to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(","),
            (Some(_), _) => {
                return Err(PipelineError::Configuration(format!(
                    "Option '{}' must be a path or a list of paths",
                    key
                )));
            }
            (None, OptionValue::Text(text)) => text.clone(),
            (None, OptionValue::Number(number)) => number.to_string(),
            (None, OptionValue::Flag(flag)) => (if *flag { "t" } else { "f" }).to_string(),
            (None, OptionValue::List(items)) => items.join(","),
        };

        Ok(match style {
            ArgStyle::KeyValue => vec![format!("{}={}", key, rendered)],
            ArgStyle::LongFlag => vec![format!("--{}", key), rendered],
        })
    }
}
