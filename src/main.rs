use clap::Parser;
use ggen_sync::{CliArgs, LoggingConfig, SyncConfig, build_context, init_logging};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = CliArgs::parse();
    let config = SyncConfig::from_args(cli)?;

    let mut logging_config = LoggingConfig::from_env();
    if config.log_to_file {
        logging_config = logging_config.with_json_sink(&config.output_root);
    }
    let _guards = init_logging(logging_config)?;

    let format = config.report_format;
    let context = build_context(config)?;

    let token = context.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling before commit");
            token.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || context.run()).await?;
    match outcome {
        Ok(report) => {
            println!("{}", report.render(format));
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            println!("{}", failure.report.render(format));
            eprintln!("{}", failure.error.render());
            if !failure.recovery_steps.is_empty() {
                eprintln!("  Recovery steps:");
                for step in &failure.recovery_steps {
                    eprintln!("    {step}");
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
