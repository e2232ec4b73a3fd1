use crate::manifest::{DEFAULT_TIMEOUT, parse_timeout};
use crate::recovery::DEFAULT_LOCK_TIMEOUT;
use crate::sync::report::ReportFormat;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MANIFEST: &str = "ggen.toml";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub manifest_path: PathBuf,
    /// Root all `output_file` paths are relative to
    pub output_root: PathBuf,
    pub incremental: bool,
    pub preflight: bool,
    pub validate_output: bool,
    pub validate_schema: bool,
    pub parallel: bool,
    pub dry_run: bool,
    pub lock_timeout: Duration,
    /// Engine timeout for transformations that do not set their own
    pub default_timeout: Duration,
    /// Command line of the external generation engine
    pub engine_command: Option<String>,
    pub report_format: ReportFormat,
    /// Also write JSON logs under `<output_root>/.ggen-logs`
    pub log_to_file: bool,
}

impl SyncConfig {
    /// Defaults for `manifest_path`, with outputs next to the manifest
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        let manifest_path = manifest_path.into();
        let output_root = manifest_dir(&manifest_path);
        Self {
            manifest_path,
            output_root,
            incremental: true,
            preflight: true,
            validate_output: true,
            validate_schema: true,
            parallel: false,
            dry_run: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            engine_command: None,
            report_format: ReportFormat::Markdown,
            log_to_file: false,
        }
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            manifest: cli_manifest,
            output: cli_output,
            no_incremental,
            no_preflight,
            no_validate_output,
            no_validate_schema,
            parallel: cli_parallel,
            dry_run,
            lock_timeout: cli_lock_timeout,
            timeout: cli_timeout,
            engine: cli_engine,
            format: cli_format,
            log_file: cli_log_file,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            manifest: file_manifest,
            output: file_output,
            incremental: file_incremental,
            preflight: file_preflight,
            validate_output: file_validate_output,
            validate_schema: file_validate_schema,
            parallel: file_parallel,
            lock_timeout: file_lock_timeout,
            timeout: file_timeout,
            engine: file_engine,
            format: file_format,
            log_file: file_log_file,
        } = file_config;

        let manifest_path = cli_manifest
            .or(file_manifest)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
        let mut cfg = Self::new(manifest_path);

        if let Some(output) = cli_output.or(file_output) {
            cfg.output_root = output;
        }

        // a CLI `--no-*` flag wins over the file; the file wins over defaults
        cfg.incremental = !no_incremental && file_incremental.unwrap_or(true);
        cfg.preflight = !no_preflight && file_preflight.unwrap_or(true);
        cfg.validate_output = !no_validate_output && file_validate_output.unwrap_or(true);
        cfg.validate_schema = !no_validate_schema && file_validate_schema.unwrap_or(true);
        cfg.parallel = cli_parallel || file_parallel.unwrap_or(false);
        cfg.dry_run = dry_run;
        cfg.log_to_file = cli_log_file || file_log_file.unwrap_or(false);

        if let Some(raw) = cli_lock_timeout.or(file_lock_timeout) {
            cfg.lock_timeout = parse_timeout(&raw)
                .map_err(|e| anyhow::anyhow!("invalid lock timeout: {e}"))?;
        }
        if let Some(raw) = cli_timeout.or(file_timeout) {
            cfg.default_timeout =
                parse_timeout(&raw).map_err(|e| anyhow::anyhow!("invalid timeout: {e}"))?;
        }

        cfg.engine_command = cli_engine
            .or(file_engine)
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty());
        cfg.report_format = cli_format.or(file_format).unwrap_or_default();

        Ok(cfg)
    }

    /// Fail fast on settings a run cannot start with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.manifest_path.as_os_str().is_empty(),
            "manifest path must not be empty"
        );
        anyhow::ensure!(
            !self.output_root.as_os_str().is_empty(),
            "output root must not be empty"
        );
        if self.output_root.exists() {
            anyhow::ensure!(
                self.output_root.is_dir(),
                "output root {:?} is not a directory",
                self.output_root
            );
        }
        anyhow::ensure!(
            !self.lock_timeout.is_zero(),
            "lock timeout must be greater than zero"
        );
        anyhow::ensure!(
            !self.default_timeout.is_zero(),
            "timeout must be greater than zero"
        );
        Ok(())
    }
}

fn manifest_dir(manifest: &Path) -> PathBuf {
    match manifest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "ggen-sync",
    about = "Transactional, incremental file generation from a ggen.toml manifest",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 'm',
        env = "GGEN_MANIFEST",
        value_name = "FILE",
        help = "Manifest to sync (default: ./ggen.toml)"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(
        long,
        short = 'o',
        env = "GGEN_OUTPUT_ROOT",
        value_name = "DIR",
        help = "Output root (default: the manifest's directory)"
    )]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Regenerate every transformation, ignoring the hash cache")]
    pub no_incremental: bool,

    #[arg(long, help = "Skip pre-flight environment checks")]
    pub no_preflight: bool,

    #[arg(long, help = "Skip syntax validation of generated outputs")]
    pub no_validate_output: bool,

    #[arg(long, help = "Skip SHACL validation of transformation inputs")]
    pub no_validate_schema: bool,

    #[arg(
        long,
        env = "GGEN_PARALLEL",
        help = "Generate independent transformations concurrently"
    )]
    pub parallel: bool,

    #[arg(long, help = "Stage and validate everything, then roll back")]
    pub dry_run: bool,

    #[arg(
        long,
        env = "GGEN_LOCK_TIMEOUT",
        value_name = "DURATION",
        help = "How long to wait for another sync's lock (e.g. 30s, 5m)"
    )]
    pub lock_timeout: Option<String>,

    #[arg(
        long,
        env = "GGEN_TIMEOUT",
        value_name = "DURATION",
        help = "Default per-transformation engine timeout (e.g. 60s)"
    )]
    pub timeout: Option<String>,

    #[arg(
        long,
        env = "GGEN_ENGINE",
        value_name = "COMMAND",
        help = "Generation engine command; receives the transformation as JSON on stdin"
    )]
    pub engine: Option<String>,

    #[arg(
        long,
        env = "GGEN_REPORT_FORMAT",
        value_enum,
        value_name = "FORMAT",
        help = "Report format (markdown or json)"
    )]
    pub format: Option<ReportFormat>,

    #[arg(long, help = "Also write JSON logs under <output>/.ggen-logs")]
    pub log_file: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    manifest: Option<PathBuf>,
    output: Option<PathBuf>,
    incremental: Option<bool>,
    preflight: Option<bool>,
    validate_output: Option<bool>,
    validate_schema: Option<bool>,
    parallel: Option<bool>,
    lock_timeout: Option<String>,
    timeout: Option<String>,
    engine: Option<String>,
    format: Option<ReportFormat>,
    log_file: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("ggen-sync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_put_outputs_next_to_manifest() {
        let cfg = SyncConfig::from_args(parse(&["--manifest", "project/ggen.toml"])).unwrap();
        assert_eq!(cfg.output_root, PathBuf::from("project"));
        assert!(cfg.incremental && cfg.preflight && cfg.validate_output);
        assert!(!cfg.parallel && !cfg.dry_run);
        assert_eq!(cfg.default_timeout, DEFAULT_TIMEOUT);

        let bare = SyncConfig::new("ggen.toml");
        assert_eq!(bare.output_root, PathBuf::from("."));
    }

    #[test]
    fn flags_and_timeouts_are_applied() {
        let cfg = SyncConfig::from_args(parse(&[
            "--no-incremental",
            "--parallel",
            "--timeout",
            "5m",
            "--lock-timeout",
            "10",
            "--format",
            "json",
            "--engine",
            "  ggen render  ",
        ]))
        .unwrap();
        assert!(!cfg.incremental);
        assert!(cfg.parallel);
        assert_eq!(cfg.default_timeout, Duration::from_secs(300));
        assert_eq!(cfg.lock_timeout, Duration::from_secs(10));
        assert_eq!(cfg.report_format, ReportFormat::Json);
        assert_eq!(cfg.engine_command.as_deref(), Some("ggen render"));
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        assert!(SyncConfig::from_args(parse(&["--timeout", "soon"])).is_err());
    }

    #[test]
    fn config_file_fills_gaps_and_cli_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sync.yaml");
        fs::write(
            &file,
            "output: generated\nparallel: true\nincremental: false\ntimeout: 30s\n",
        )
        .unwrap();

        let cfg = SyncConfig::from_args(parse(&[
            "--config",
            file.to_str().unwrap(),
            "--output",
            "elsewhere",
        ]))
        .unwrap();
        assert_eq!(cfg.output_root, PathBuf::from("elsewhere"));
        assert!(cfg.parallel);
        assert!(!cfg.incremental);
        assert_eq!(cfg.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_file_as_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "").unwrap();
        let mut cfg = SyncConfig::new(dir.path().join("ggen.toml"));
        assert!(cfg.validate().is_ok());
        cfg.output_root = file;
        assert!(cfg.validate().is_err());
    }
}
