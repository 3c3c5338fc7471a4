// seed_groups - Load a JSON fixture of users, courses, groups and edges into the store

use std::env;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use group_graph::{
    config::Config,
    data_seeder::{load_fixture, seed_fixture},
    database::GroupDatabase,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: seed_groups <fixture.json>");
        eprintln!("The target store is taken from DATABASE_URL.");
        return Ok(());
    }

    let config = Config::from_env()?;
    let fixture = load_fixture(Path::new(&args[1]))?;

    // The store is opened for this run only and closed on every exit path below
    let db = GroupDatabase::new(
        &config.database.url,
        config.database.max_connections,
        config.cache.capacity,
    )
    .await?;
    let result = match db.init().await {
        Ok(()) => seed_fixture(&db, fixture).await,
        Err(e) => Err(e),
    };
    db.close().await;

    let report = result?;
    info!(
        groups = report.groups,
        users = report.users,
        links = report.links,
        "Seeded {} into {}",
        args[1],
        config.database.url
    );
    Ok(())
}
