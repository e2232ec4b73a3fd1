pub mod codegen;
pub mod config;
pub mod engine;
pub mod error;
pub mod incremental;
pub mod logging;
pub mod manifest;
pub mod ontology;
pub mod preflight;
pub mod recovery;
pub mod sync;
pub mod validation;

pub use config::{CliArgs, SyncConfig};
pub use engine::{GenerationEngine, ProcessEngine};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use logging::{LoggingConfig, init_logging};
pub use manifest::{Manifest, TransformationSpec};
pub use sync::{ReportFormat, SyncContext, SyncFailure, SyncReport};

use anyhow::{Context, Result};
use std::sync::Arc;

/// Build a run context for `config`, using the configured external engine
pub fn build_context(config: SyncConfig) -> Result<SyncContext> {
    config.validate()?;
    let command = config.engine_command.as_deref().context(
        "no generation engine configured; pass --engine or set GGEN_ENGINE",
    )?;
    let engine =
        ProcessEngine::from_command_line(command)?.with_default_timeout(config.default_timeout);

    tracing::info!(
        manifest = %config.manifest_path.display(),
        output_root = %config.output_root.display(),
        engine = command,
        incremental = config.incremental,
        parallel = config.parallel,
        dry_run = config.dry_run,
        "sync configured"
    );
    Ok(SyncContext::new(config, Arc::new(engine)))
}
