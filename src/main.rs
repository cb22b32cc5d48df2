use clap::Parser;
use rssdm_e2e::args::Args;
use rssdm_e2e::{Settings, harness};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut settings = match Settings::new(args.config.clone()) {
        Ok(settings) => settings,
        Err(err) => {
            error!("failed to load settings: {err}");
            std::process::exit(rssdm_e2e::report::EXIT_STARTUP_FAILURE);
        }
    };
    settings.merge_with_args(&args);
    if let Err(err) = settings.validate() {
        error!("invalid settings: {err:#}");
        std::process::exit(rssdm_e2e::report::EXIT_STARTUP_FAILURE);
    }

    info!(
        "starting E2E run: backend '{}' on {}, compose project '{}'",
        settings.backend.command,
        settings.backend_url(),
        settings.compose.project
    );

    let report = harness::run(&settings, args.keep_services).await;
    print!("{}", report.render());
    std::process::exit(report.exit_code());
}
