//! Sync orchestration
//!
//! ```text
//! lock → recover interrupted commit → manifest → validate → pre-flight
//!      → per transformation: check (incremental / schema) → generate → validate output
//!      → stage → commit → record hashes → record success
//! ```
//!
//! Validation-phase problems (manifest, pre-flight, schema, output syntax)
//! are collected before failing; engine and commit errors stop the run. Any
//! failure rolls back the staged batch and is routed through the
//! [`RecoveryManager`] for recovery guidance.

pub mod report;
pub mod state;

pub use report::{ReportFormat, RunStatus, SyncReport, TransformReport};
pub use state::TransformState;

use crate::codegen::{
    AtomicWriter, InterruptedCommit, OutputKind, OutputValidator, TransactionGuard,
};
use crate::config::SyncConfig;
use crate::engine::{EngineTimeout, GenerationEngine};
use crate::error::{SyncError, SyncResult};
use crate::incremental::IncrementalTracker;
use crate::manifest::{Manifest, TransformationSpec, validate_manifest};
use crate::ontology::SchemaValidator;
use crate::preflight::PreflightChecker;
use crate::recovery::{RecoveryManager, RunLock};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

const SLOW_TRANSFORMATION_MS: u64 = 5_000;

/// A failed run: the terminal error, its recovery steps and the partial report
#[derive(Debug, Error)]
#[error("sync failed: {error}")]
pub struct SyncFailure {
    #[source]
    pub error: SyncError,
    pub recovery_steps: Vec<String>,
    pub report: SyncReport,
}

/// Everything one run needs, built once per invocation
pub struct SyncContext {
    config: SyncConfig,
    engine: Arc<dyn GenerationEngine>,
    schema_validator: SchemaValidator,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .field("schema_validator", &self.schema_validator.mode())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

struct Produced {
    content: String,
    warnings: Vec<String>,
}

/// Result of generating and validating one transformation
struct Generation {
    index: usize,
    elapsed: Duration,
    generated: bool,
    result: SyncResult<Produced>,
}

impl SyncContext {
    pub fn new(config: SyncConfig, engine: Arc<dyn GenerationEngine>) -> Self {
        Self {
            config,
            engine,
            schema_validator: SchemaValidator::detect(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_schema_validator(mut self, validator: SchemaValidator) -> Self {
        self.schema_validator = validator;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole pipeline once
    pub fn run(&self) -> Result<SyncReport, SyncFailure> {
        let started = Instant::now();
        let output_root = &self.config.output_root;
        let _span = info_span!("sync", output_root = %output_root.display()).entered();

        let mut recovery = RecoveryManager::new(output_root);
        let mut report = SyncReport::new(output_root.display().to_string());
        let result = self.execute(&mut recovery, &mut report);
        report.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(
                    executed = report.executed(),
                    skipped = report.skipped(),
                    files = report.files_committed.len(),
                    duration_ms = report.duration_ms,
                    status = %report.status,
                    "sync finished"
                );
                Ok(report)
            }
            Err(error) => {
                let recovery_steps = recovery.handle_failure(&error);
                report.status = RunStatus::Failed;
                report.error = Some(error.to_string());
                report.error_kind = Some(error.kind());
                report.recovery_steps = recovery_steps.clone();
                Err(SyncFailure {
                    error,
                    recovery_steps,
                    report,
                })
            }
        }
    }

    fn execute(&self, recovery: &mut RecoveryManager, report: &mut SyncReport) -> SyncResult<()> {
        let _lock = RunLock::acquire(&self.config.output_root, self.config.lock_timeout)?;
        let result = self.execute_locked(recovery, report);
        if let Err(error) = &result {
            // a failed commit keeps its journal so the next run can roll forward
            if !matches!(error, SyncError::CommitFailed { .. }) {
                recovery.cleanup();
            }
        }
        result
    }

    fn execute_locked(
        &self,
        recovery: &mut RecoveryManager,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let root = &self.config.output_root;

        match AtomicWriter::recover_interrupted(root)? {
            InterruptedCommit::Clean => {}
            InterruptedCommit::Discarded => report
                .warnings
                .push("Discarded staging directory left by an earlier run".to_string()),
            InterruptedCommit::RolledForward { files } => report.warnings.push(format!(
                "Completed interrupted commit of {} file(s) from an earlier run",
                files.len()
            )),
        }

        let manifest = Manifest::load(&self.config.manifest_path)?;
        self.check_manifest(&manifest, report)?;

        report.transformations = manifest
            .transformations
            .iter()
            .map(|t| TransformReport::new(&t.name, &t.output_file))
            .collect();
        recovery.record_attempt(&manifest.transformation_names());

        let mut tracker = IncrementalTracker::open(root);
        let mut guard = TransactionGuard::begin(root)?;

        let to_generate = self.check_transformations(&manifest, &tracker, report)?;
        let produced = self.generate_all(&manifest, &to_generate, report)?;

        for (index, content) in produced {
            self.ensure_not_cancelled()?;
            let spec = &manifest.transformations[index];
            if let Err(error) = guard.write(&spec.output_file, content) {
                self.fail(report, index, &error);
                return Err(error);
            }
            self.advance(report, index, TransformState::Staged)?;
        }

        self.ensure_not_cancelled()?;

        if self.config.dry_run {
            guard.rollback()?;
            report.status = RunStatus::DryRun;
            info!(staged = to_generate.len(), "dry run: staged outputs discarded");
            recovery.record_success();
            return Ok(());
        }

        if guard.staged_files().next().is_none() {
            guard.rollback()?;
            debug!("nothing to commit");
        } else {
            let committed = match guard.commit() {
                Ok(tx) => tx,
                Err(error) => {
                    for &index in &to_generate {
                        self.fail(report, index, &error);
                    }
                    return Err(error);
                }
            };
            report.files_committed = committed.files.keys().cloned().collect();
            for &index in &to_generate {
                self.advance(report, index, TransformState::Committed)?;
            }
        }

        self.record_incremental(&manifest, &to_generate, &mut tracker, report);
        recovery.record_success();
        Ok(())
    }

    /// Manifest structure and environment; every problem is reported at once.
    ///
    /// With pre-flight enabled, structural errors come back as
    /// `ManifestInvalid` carrying the pre-flight findings too, so a bad field
    /// and an unwritable directory show up in the same report.
    fn check_manifest(&self, manifest: &Manifest, report: &mut SyncReport) -> SyncResult<()> {
        let validation = validate_manifest(manifest);
        if !self.config.preflight {
            if validation.has_errors() {
                return Err(SyncError::ManifestInvalid {
                    path: manifest.path.clone(),
                    field_errors: validation.errors,
                });
            }
            report.warnings.extend(validation.warnings);
            return Ok(());
        }

        let preflight = PreflightChecker::new(&self.config.output_root).run(manifest);
        report.warnings.extend(preflight.warnings().iter().cloned());
        if validation.has_errors() {
            return Err(SyncError::ManifestInvalid {
                path: manifest.path.clone(),
                field_errors: preflight.into_errors(),
            });
        }
        if !preflight.passed() {
            return Err(SyncError::PreflightFailed {
                errors: preflight.into_errors(),
            });
        }
        Ok(())
    }

    /// Decide what to regenerate and validate inputs against their shapes.
    ///
    /// Returns the indices that need generation, in manifest order.
    fn check_transformations(
        &self,
        manifest: &Manifest,
        tracker: &IncrementalTracker,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<usize>> {
        let mut to_generate = Vec::new();
        let mut violations = Vec::new();

        for (index, spec) in manifest.transformations.iter().enumerate() {
            self.ensure_not_cancelled()?;
            self.advance(report, index, TransformState::Checked)?;

            let expected_output = self.config.output_root.join(&spec.output_file);
            if self.config.incremental
                && !tracker.needs_update(&spec.tracked_files())
                && tracker.outputs_current(&spec.name, &[&expected_output])
            {
                debug!(transformation = %spec.name, "inputs unchanged, skipping");
                self.advance(report, index, TransformState::Skipped)?;
                continue;
            }

            if self.config.validate_schema && !spec.schema_files.is_empty() {
                let outcome = self
                    .schema_validator
                    .validate_files(&spec.input_files, &spec.schema_files);
                report.transformations[index]
                    .warnings
                    .extend(outcome.warnings.iter().cloned());
                if !outcome.valid {
                    let message = outcome.violations.join("; ");
                    warn!(
                        transformation = %spec.name,
                        violations = outcome.violations.len(),
                        "schema validation failed"
                    );
                    violations.extend(
                        outcome
                            .violations
                            .into_iter()
                            .map(|v| format!("{}: {v}", spec.name)),
                    );
                    self.mark_failed(report, index, message);
                    continue;
                }
            }

            to_generate.push(index);
        }

        if !violations.is_empty() {
            return Err(SyncError::SchemaInvalid { violations });
        }
        Ok(to_generate)
    }

    /// Generate and validate every selected transformation.
    ///
    /// Output validation failures are collected across the batch; an engine
    /// failure stops the run.
    fn generate_all(
        &self,
        manifest: &Manifest,
        indices: &[usize],
        report: &mut SyncReport,
    ) -> SyncResult<Vec<(usize, String)>> {
        let validator = OutputValidator::new().with_pending_outputs(
            manifest
                .transformations
                .iter()
                .map(|t| self.config.output_root.join(&t.output_file)),
        );

        let generations: Vec<Generation> = if self.config.parallel {
            indices
                .par_iter()
                .map(|&index| self.produce(index, &manifest.transformations[index], &validator))
                .collect()
        } else {
            let mut out = Vec::with_capacity(indices.len());
            for &index in indices {
                let generation =
                    self.produce(index, &manifest.transformations[index], &validator);
                let engine_failed = !generation.generated;
                out.push(generation);
                if engine_failed {
                    break;
                }
            }
            out
        };

        let mut produced = Vec::with_capacity(generations.len());
        let mut first_error = None;
        for generation in generations {
            let index = generation.index;
            report.transformations[index].duration_ms = generation.elapsed.as_millis() as u64;
            if generation.generated {
                self.advance(report, index, TransformState::Generated)?;
            }
            match generation.result {
                Ok(output) => {
                    report.transformations[index].warnings.extend(output.warnings);
                    self.advance(report, index, TransformState::Validated)?;
                    produced.push((index, output.content));
                }
                Err(error) => {
                    self.fail(report, index, &error);
                    let engine_error = !generation.generated;
                    match &first_error {
                        None => first_error = Some(error),
                        // engine failures outrank validation failures
                        Some(SyncError::ValidationFailed { .. }) if engine_error => {
                            first_error = Some(error)
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(produced),
        }
    }

    fn produce(
        &self,
        index: usize,
        spec: &TransformationSpec,
        validator: &OutputValidator,
    ) -> Generation {
        let _span = info_span!("transformation", transformation = %spec.name).entered();
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            return Generation {
                index,
                elapsed: started.elapsed(),
                generated: false,
                result: Err(SyncError::Cancelled),
            };
        }

        // inputs can vanish between the checks and generation
        if let Some(missing) = spec.input_files.iter().find(|p| !p.is_file()) {
            let error = SyncError::InputNotFound {
                transformation: spec.name.clone(),
                path: missing.clone(),
            };
            warn!(error = %error, "input disappeared before generation");
            return Generation {
                index,
                elapsed: started.elapsed(),
                generated: false,
                result: Err(error),
            };
        }

        let content = match self.engine.generate(spec) {
            Ok(content) => content,
            Err(e) => {
                let error = match e.downcast_ref::<EngineTimeout>() {
                    Some(timeout) => SyncError::GenerationTimeout {
                        transformation: spec.name.clone(),
                        timeout_secs: timeout.timeout.as_secs(),
                    },
                    None => SyncError::generation(&spec.name, &e),
                };
                warn!(error = %error, "generation failed");
                return Generation {
                    index,
                    elapsed: started.elapsed(),
                    generated: false,
                    result: Err(error),
                };
            }
        };

        let result = if self.config.validate_output {
            let final_path = self.config.output_root.join(&spec.output_file);
            let validation = validator.validate(&final_path, &content);
            if validation.has_errors() {
                Err(SyncError::ValidationFailed {
                    format: OutputKind::from_path(&final_path).to_string(),
                    path: spec.output_file.clone(),
                    detail: validation.errors.join("; "),
                })
            } else {
                Ok(Produced {
                    content,
                    warnings: validation.warnings,
                })
            }
        } else {
            Ok(Produced {
                content,
                warnings: Vec::new(),
            })
        };

        let elapsed = started.elapsed();
        crate::log_slow_operation!(
            elapsed,
            SLOW_TRANSFORMATION_MS,
            output = %spec.output_file,
            valid = result.is_ok(),
            "transformation generated"
        );
        Generation {
            index,
            elapsed,
            generated: true,
            result,
        }
    }

    /// Best-effort: the cache is advisory and never fails a committed run
    fn record_incremental(
        &self,
        manifest: &Manifest,
        committed: &[usize],
        tracker: &mut IncrementalTracker,
        report: &mut SyncReport,
    ) {
        for &index in committed {
            let spec = &manifest.transformations[index];
            for path in spec.tracked_files() {
                if let Err(e) = tracker.record_input(path) {
                    warn!(transformation = %spec.name, error = %e, "could not record input hash");
                }
            }
            let output = self.config.output_root.join(&spec.output_file);
            tracker.record_outputs(&spec.name, &[output]);
        }
        tracker.cleanup_stale();
        if let Err(e) = tracker.save() {
            warn!(error = %e, "could not save incremental state");
            report.warnings.push(format!("Incremental state not saved: {e}"));
        }
    }

    fn ensure_not_cancelled(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn advance(
        &self,
        report: &mut SyncReport,
        index: usize,
        next: TransformState,
    ) -> SyncResult<()> {
        report.transformations[index].state.advance(next)
    }

    fn fail(&self, report: &mut SyncReport, index: usize, error: &SyncError) {
        self.mark_failed(report, index, error.to_string());
    }

    fn mark_failed(&self, report: &mut SyncReport, index: usize, message: String) {
        let entry = &mut report.transformations[index];
        if !entry.state.is_terminal() {
            entry.state = TransformState::Failed;
        }
        entry.error = Some(message);
    }
}
