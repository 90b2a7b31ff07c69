//! One change request applied across a project.
//!
//! Index the Python sources, pick the files the request is about, then for
//! each of them run a two-phase generation and stitch the fragments back
//! together. Writing the results is left to the caller.
use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::generation::prompts::file_selection_prompt;
use crate::generation::session::ContinuationSession;
use crate::generation::{GenerationError, Generator, Phase, RetryPolicy};
use crate::indexer::ParseError;
use crate::indexer::core::Indexer;
use crate::indexer::index::ProjectIndex;
use crate::indexer::relevance::{FileSelection, RelevanceSearch, parse_selected_paths};
use crate::stitch::cleanup::{strip_code_fences, tidy};
use crate::stitch::{StitchEngine, StitchResult, TargetLanguage};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    #[error("{path}: {source}")]
    Generation {
        path: String,
        #[source]
        source: GenerationError,
    },

    #[error("{path}: not part of the project")]
    UnknownFile { path: String },
}

impl RepairError {
    pub fn path(&self) -> &str {
        match self {
            RepairError::Generation { path, .. } | RepairError::UnknownFile { path } => path,
        }
    }
}

/// A successfully regenerated file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRepair {
    pub path: String,
    pub text: String,
    pub stitch: StitchResult,
    pub completed_in_phase_one: bool,
}

/// Which files a request targets and what the index looked like.
#[derive(Debug)]
pub struct RepairPlan {
    pub index: ProjectIndex,
    pub selection: FileSelection,
    pub parse_failures: Vec<ParseError>,
}

#[derive(Debug)]
pub struct RepairReport {
    pub plan: RepairPlan,
    pub repaired: Vec<FileRepair>,
    pub failed: Vec<RepairError>,
}

impl RepairReport {
    /// `path -> new content` for every repaired file.
    pub fn files_to_write(&self) -> BTreeMap<String, String> {
        self.repaired
            .iter()
            .map(|r| (r.path.clone(), r.text.clone()))
            .collect()
    }

    /// Repaired files whose stitched text still does not parse.
    pub fn syntax_warnings(&self) -> impl Iterator<Item = &FileRepair> {
        self.repaired.iter().filter(|r| !r.stitch.syntax_valid)
    }
}

pub struct RepairPipeline<'a> {
    generator: &'a dyn Generator,
    config: &'a Config,
    policy: RetryPolicy,
}

impl<'a> RepairPipeline<'a> {
    pub fn new(generator: &'a dyn Generator, config: &'a Config) -> Self {
        let policy = RetryPolicy::new(
            config.generation.max_attempts,
            config.generation.backoff_base(),
        );
        Self {
            generator,
            config,
            policy,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Index `files` and select the ones relevant to `request`.
    pub fn plan(&self, request: &str, files: &BTreeMap<String, String>) -> anyhow::Result<RepairPlan> {
        let mut indexer = Indexer::new()?;
        let mut index = ProjectIndex::new();
        let scan = indexer.index_files(files, &mut index);
        info!(
            "Indexed {} files ({} elements), {} failed to parse",
            scan.indexed, scan.elements, scan.failed
        );

        let search = RelevanceSearch::new(self.config.search.min_query_token_chars);
        let selection = match self.select_with_generator(request, &search, &index, files) {
            Some(selection) => selection,
            None => {
                let selection = search.select_files(
                    request,
                    &index,
                    files,
                    &self.config.files.fallback_extensions,
                );
                if selection.fallback {
                    warn!(
                        "No element matched the request, falling back to {} allow-listed files",
                        selection.paths.len()
                    );
                }
                selection
            }
        };

        Ok(RepairPlan {
            index,
            selection,
            parse_failures: scan.failures,
        })
    }

    /// Let the generator pick files from the context payload. `None` when
    /// disabled, on failure, or when the reply names no project file.
    fn select_with_generator(
        &self,
        request: &str,
        search: &RelevanceSearch,
        index: &ProjectIndex,
        files: &BTreeMap<String, String>,
    ) -> Option<FileSelection> {
        if !self.config.search.generator_selection {
            return None;
        }

        let payload = search.context_payload(
            request,
            index,
            files,
            &self.config.files.fallback_extensions,
            self.config.search.context_lines,
        );
        let prompt = file_selection_prompt(request, &payload);
        let reply = match self.policy.call(self.generator, &prompt, Phase::Selection) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("File selection failed, using keyword matching: {e}");
                return None;
            }
        };

        let paths = parse_selected_paths(&reply, files);
        if paths.is_empty() {
            warn!("Generator named no project file, using keyword matching");
            return None;
        }
        info!("Generator selected {} files", paths.len());
        Some(FileSelection {
            paths,
            fallback: false,
        })
    }

    /// Regenerate one file.
    pub fn repair_file(
        &self,
        path: &str,
        source: &str,
        request: &str,
    ) -> Result<FileRepair, RepairError> {
        let outcome = ContinuationSession::new(self.generator, self.policy, path, source, request)
            .with_stop_sentinel(&self.config.protocol.stop_sentinel)
            .run()
            .map_err(|source| RepairError::Generation {
                path: path.to_string(),
                source,
            })?;

        let part_one = strip_code_fences(&outcome.part_one);
        let part_two = outcome
            .part_two
            .as_deref()
            .map(strip_code_fences)
            .unwrap_or_default();

        let engine = StitchEngine::new(TargetLanguage::for_path(path));
        let stitch = engine.stitch(&part_one, &part_two);

        let text = match engine.language {
            TargetLanguage::Python => {
                let tidied = tidy(&stitch.text);
                // Keep the raw stitch if tidying broke a text that parsed.
                if stitch.syntax_valid && crate::syntax::check_python(&tidied).is_err() {
                    stitch.text.clone()
                } else {
                    tidied
                }
            }
            TargetLanguage::PlainText => stitch.text.clone(),
        };

        if !stitch.syntax_valid {
            warn!(
                "{path}: stitched with {} but does not parse: {}",
                stitch.method,
                stitch.syntax_error.as_deref().unwrap_or("unknown error")
            );
        } else {
            info!("{path}: stitched with {}", stitch.method);
        }

        Ok(FileRepair {
            path: path.to_string(),
            text,
            stitch,
            completed_in_phase_one: outcome.completed_in_phase_one,
        })
    }

    /// Plan and repair every selected file. One file failing never stops
    /// the others.
    pub fn run(&self, request: &str, files: &BTreeMap<String, String>) -> anyhow::Result<RepairReport> {
        self.run_with_progress(request, files, |_| {})
    }

    /// Same as [`run`](Self::run), calling `on_file` before each file is sent.
    pub fn run_with_progress(
        &self,
        request: &str,
        files: &BTreeMap<String, String>,
        mut on_file: impl FnMut(&str),
    ) -> anyhow::Result<RepairReport> {
        let plan = self.plan(request, files)?;
        let mut repaired = Vec::new();
        let mut failed = Vec::new();

        for path in &plan.selection.paths {
            on_file(path);
            let result = match files.get(path) {
                Some(source) => self.repair_file(path, source, request),
                None => Err(RepairError::UnknownFile { path: path.clone() }),
            };
            match result {
                Ok(r) => repaired.push(r),
                Err(e) => {
                    error!("{e}");
                    failed.push(e);
                }
            }
        }

        Ok(RepairReport {
            plan,
            repaired,
            failed,
        })
    }
}
