use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use quad_pager::config::{CliArgs, SessionConfig};
use quad_pager::session::Session;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let (verbose, json) = (args.verbose, args.json);
    let mut config: SessionConfig = match args.config.clone() {
        Some(path) => SessionConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => args.into(),
    };
    config.verbose |= verbose;
    config.json |= json;

    // Init tracing
    let filter = if config.verbose {
        EnvFilter::new("quad_pager=debug")
    } else {
        EnvFilter::new("quad_pager=info")
    };
    // Logs go to stderr so a JSON report on stdout stays parseable.
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        logs.json().init();
    } else {
        logs.init();
    }

    match Session::run(&config) {
        Ok(report) => {
            if config.json {
                let json = serde_json::to_string_pretty(&report)
                    .context("Failed to serialize session report")?;
                println!("{json}");
            } else {
                println!(
                    "Done: {} tiles loaded, {} failed ({} retried) over {} steps in {:.2}ms",
                    report.loaded, report.failed, report.retried, report.steps, report.elapsed_ms
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(%e, "Session failed");
            Err(anyhow::anyhow!(e)).context("quad-pager session failed")
        }
    }
}
