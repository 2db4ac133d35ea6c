use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use deskboard::{
    ConsoleNotifier, Config, Dashboard, Notifier, Profile, Session, SqliteStore, SyncContext,
    TracingNotifier,
    cli::{Cli, Commands},
    utils,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev {
        Profile::Dev
    } else {
        Profile::Prod
    };

    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from_path(&utils::expand_path(path))?,
        None => Config::load_with_profile(profile)?,
    };

    // RUST_LOG wins over the configured filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize store
    let db_path = config.get_database_path();
    let store = SqliteStore::new(
        db_path
            .to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?,
    )?;

    let session = match cli.user.clone().or_else(|| config.identity.clone()) {
        Some(id) => Session::signed_in(id),
        None => Session::anonymous(),
    };
    let notifier: Arc<dyn Notifier> = if cli.quiet {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(ConsoleNotifier)
    };

    let dashboard = Dashboard::new(SyncContext::new(
        Arc::new(store),
        Arc::new(session),
        notifier,
    ));

    // Dispatch to appropriate command handler
    let command = cli.command.unwrap_or(Commands::Dashboard { limit: None });
    deskboard::cli::run(command, &dashboard, &config).await?;
    dashboard.dispose();

    Ok(())
}
