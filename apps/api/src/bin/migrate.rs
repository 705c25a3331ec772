use std::collections::HashSet;

use clap::{Parser, Subcommand};
use peakself_api::{db, telemetry};
use peakself_shared_config::{CommonConfig, DatabaseConfig};

#[derive(Parser)]
#[command(name = "peakself-migrate")]
#[command(about = "Apply or inspect PeakSelf database migrations", long_about = None)]
struct Cli {
    /// PostgreSQL connection string (defaults to the DATABASE_URL setting)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Run,
    /// List migrations and whether they are applied
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let common = CommonConfig::from_env()?;
    telemetry::init_tracing(&common);

    let database = match cli.database_url {
        Some(url) => DatabaseConfig {
            max_connections: 2,
            ..DatabaseConfig::with_url(url)
        },
        None => common.database.clone(),
    };

    let pool = db::connect(&database).await?;

    match cli.command {
        Commands::Run => {
            db::run_migrations(&pool).await?;
            println!("Migrations applied");
        }
        Commands::Info => {
            let table_exists: bool =
                sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
                    .fetch_one(&pool)
                    .await?;

            let applied: HashSet<i64> = if table_exists {
                sqlx::query_scalar::<_, i64>(
                    "SELECT version FROM _sqlx_migrations WHERE success ORDER BY version",
                )
                .fetch_all(&pool)
                .await?
                .into_iter()
                .collect()
            } else {
                HashSet::new()
            };

            for migration in db::MIGRATOR.iter() {
                let status = if applied.contains(&migration.version) {
                    "applied"
                } else {
                    "pending"
                };
                println!(
                    "{:>16}  {:<8} {}",
                    migration.version, status, migration.description
                );
            }
        }
    }

    pool.close().await;
    Ok(())
}
