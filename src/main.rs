use mimalloc::MiMalloc;
use pcfmirror::config::ConnectionProfile;
use pcfmirror::models::sync_run;
use pcfmirror::services::{diagnostics, sync, writeback};
use pcfmirror::db;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const USAGE: &str = "usage: pcfmirror <sync | test-connection | set-status <id> <status> | runs>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pcfmirror=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("");

    match command {
        "sync" => {
            let profile = ConnectionProfile::from_env()?;
            let mirror = open_mirror().await?;
            let outcome = sync::sync(&mirror, &profile).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        "test-connection" => {
            let profile = ConnectionProfile::from_env()?;
            let report = diagnostics::test_connection(&profile).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "set-status" => {
            let profile = ConnectionProfile::from_env()?;
            let id: i64 = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!(USAGE))?
                .parse()?;
            let status = args.get(3).ok_or_else(|| anyhow::anyhow!(USAGE))?;
            let mirror = open_mirror().await?;
            let change = writeback::set_status(&mirror, &profile, id, status).await?;
            println!("{}", serde_json::to_string(&change)?);
        }
        "runs" => {
            let mirror = open_mirror().await?;
            for run in sync_run::recent_runs(&mirror, 20).await? {
                println!("{}", serde_json::to_string(&run)?);
            }
        }
        _ => anyhow::bail!(USAGE),
    }

    Ok(())
}

async fn open_mirror() -> anyhow::Result<sqlx::SqlitePool> {
    let url = std::env::var("MIRROR_DB_URL")
        .unwrap_or_else(|_| "sqlite://pcfmirror.sqlite3".to_string());
    let pool = db::connect_mirror(&url).await?;
    db::ensure_schema(&pool).await?;
    Ok(pool)
}
