use docstore_core::migration::client::UploadClient;
use docstore_core::migration::log::MigrationLog;
use docstore_core::migration::source::LegacySource;
use docstore_core::migration::Migrator;
use docstore_core::util::config::MigrationConfig;
use docstore_core::util::shutdown::shutdown_flag;
use docstore_core::util::usage;
use docstore_core::meta;
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("DS_APP_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if usage::handle_migrator_cli_flags(APP_VERSION) {
        return Ok(());
    }

    init_tracing();

    let config = MigrationConfig::load()?;
    let log_pool = meta::db::connect(&config.log_dsn).await?;
    let documents_pool = meta::db::connect(&config.source_dsn).await?;
    let content_pool = meta::db::connect(&config.content_dsn).await?;

    let log = MigrationLog::new(log_pool);
    let source = LegacySource::new(
        documents_pool,
        content_pool,
        &config.documents_table,
        &config.content_table,
    );
    let client = UploadClient::new(&config.target_url)?;
    let migrator = Migrator::new(config, log, source, client);

    let cancel = shutdown_flag();
    match migrator.run(&cancel).await {
        Ok(report) => {
            tracing::info!(exhausted = report.exhausted, "migration worker exiting");
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "migration worker aborted");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
