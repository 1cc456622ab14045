mod clock;
mod commands;
mod config;
mod server;
mod wiring;

use clap::{Parser, Subcommand};
use praefect_cli::{LogArgs, OrBail};

#[derive(Parser)]
#[command(name = "praefect", about = "gRPC reverse proxy and replication coordinator for a virtualized storage cluster")]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[arg(long = "config", short = 'c', default_value = "praefect.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy, replication workers, reconciler, and health monitor.
    Serve,
    /// Run a single reconciliation pass and exit.
    Reconcile,
    /// Print repositories that are behind a reference storage.
    Status {
        #[arg(long)]
        virtual_storage: String,
        #[arg(long)]
        reference: String,
    },
    /// Dial every configured node and report reachability.
    DialNodes,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    praefect_cli::init_logging(&cli.log);

    let cfg = config::load(&cli.config).or_bail("failed to load configuration");

    match cli.command {
        Command::Serve => {
            let pool = connect().await;
            commands::serve(cfg, pool).await.or_bail("serve exited with an error");
        }
        Command::Reconcile => {
            let pool = connect().await;
            commands::reconcile(cfg, pool).await.or_bail("reconciliation pass failed");
        }
        Command::Status { virtual_storage, reference } => {
            let pool = connect().await;
            commands::status(pool, virtual_storage, reference).await.or_bail("status query failed");
        }
        Command::DialNodes => {
            commands::dial_nodes(cfg).await.or_bail("dial-nodes failed");
        }
    }
}

async fn connect() -> sqlx::PgPool {
    let url = config::database_url().or_bail("failed to resolve database connection string");
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .or_bail("failed to connect to postgres")
}
