use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wheels_builder::{Cli, HttpInventory, Pipeline, PublishError, PublishResult, SystemRunner};

fn setup_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let config = cli.into_pipeline_config()?;
    let mut runner = SystemRunner::new();
    if let Some(publish) = &config.publish {
        runner = runner.with_secret(publish.target.token.clone());
    }
    let inventory = HttpInventory::new(config.index_url.clone());
    debug!("reading the index from {}", config.index_url);

    let report = Pipeline::new(config, &runner, &inventory).run()?;
    match &report.publish {
        Some(PublishResult::DryRun { content, .. }) => println!("{content}"),
        Some(PublishResult::Published {
            package, version, ..
        }) => debug!("{package} {version} published"),
        Some(PublishResult::AlreadyPublished { .. }) | None => {}
    }
    let recovered = report.build.recovered();
    if recovered > 0 {
        eprintln!("♻️  {recovered} wheel(s) were recovered from the cache");
    }
    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => {
            eprintln!("💥 Some wheels failed to build, exiting with {code}");
            ExitCode::from(code as u8)
        }
        Err(err) => {
            if err.downcast_ref::<PublishError>().is_some() {
                eprintln!("💥 Publishing failed");
            }
            eprintln!("💥 wheels-builder failed");
            for cause in err.chain() {
                eprintln!("  Caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
