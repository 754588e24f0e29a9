use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "bds-webhooks")]
#[command(about = "Stripe webhook ingestion for the Battle Damage Studios storefront")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook endpoint and run the ordered job worker
    Serve {
        /// Interface to bind to
        #[arg(long, default_value = "0.0.0.0")]
        interface: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    let environment = std::env::var("BDS_ENV").unwrap_or_else(|_| "development".to_string());

    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(environment.into()),
            attach_stacktrace: true,
            ..Default::default()
        },
    )))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Sentry must be bound before the runtime starts so panics in worker
    // threads are reported
    let _sentry = init_sentry();
    bds_webhooks::logging::setup_logging();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Serve { interface, port } => commands::handle_serve(interface, port).await,
            Commands::Migrate => commands::handle_migrate().await,
        }
    });

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
