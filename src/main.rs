use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leviathan::{
    App, Archetype, ColumnDef, Config, Lv, MemoryStore, MigrationStep, Model, PgStore,
    RelationalStore, TableKind,
};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "leviathan")]
#[command(about = "Demo application running on the leviathan framework")]
struct Cli {
    /// Listen port, overrides PORT
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Run in production mode, overrides PRODUCTION
    #[arg(long, global = true)]
    production: bool,

    /// Cookie domain, overrides DOMAIN
    #[arg(long, global = true)]
    domain: Option<String>,

    /// PostgreSQL connection string, overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Use the in-process store instead of PostgreSQL
    #[arg(long, global = true)]
    memory: bool,

    #[arg(long, global = true, default_value_t = 10)]
    max_connections: u32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate and serve (default)
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Revert one table to an earlier version
    Down {
        #[arg(long)]
        table: String,
        #[arg(long)]
        to: u32,
    },
}

struct Users;

impl Model for Users {
    fn name(&self) -> &str {
        "users"
    }

    fn archetype(&self) -> Archetype {
        Archetype::Table
    }

    fn version(&self) -> u32 {
        2
    }

    fn up(&self) -> Vec<MigrationStep> {
        vec![
            MigrationStep::new(1).sql(
                "CREATE TABLE IF NOT EXISTS users (id BIGSERIAL PRIMARY KEY, \
                 created_at timestamptz NOT NULL DEFAULT now(), \
                 updated_at timestamptz NOT NULL DEFAULT now(), \
                 deleted_at timestamptz)",
            ),
            MigrationStep::new(2).sql("ALTER TABLE users ADD COLUMN IF NOT EXISTS login text"),
        ]
    }

    fn down(&self) -> Vec<MigrationStep> {
        vec![
            MigrationStep::new(1).sql("DROP TABLE IF EXISTS users"),
            MigrationStep::new(2).sql("ALTER TABLE users DROP COLUMN IF EXISTS login"),
        ]
    }

    fn columns(&self) -> Vec<ColumnDef> {
        vec![ColumnDef::new("login", "text")]
    }
}

struct Visits;

impl Model for Visits {
    fn name(&self) -> &str {
        "visits"
    }

    fn archetype(&self) -> Archetype {
        Archetype::Table
    }

    fn table_kind(&self) -> TableKind {
        TableKind::Lightweight
    }

    fn version(&self) -> u32 {
        1
    }

    fn up(&self) -> Vec<MigrationStep> {
        vec![MigrationStep::new(1).sql(
            "CREATE TABLE IF NOT EXISTS visits (id BIGSERIAL PRIMARY KEY, path text NOT NULL)",
        )]
    }

    fn columns(&self) -> Vec<ColumnDef> {
        vec![ColumnDef::new("path", "text").not_null()]
    }
}

#[derive(Deserialize)]
struct Greeting {
    name: Option<String>,
}

async fn hello(lv: Lv, axum::extract::Query(greeting): axum::extract::Query<Greeting>) -> String {
    let name = greeting.name.unwrap_or_else(|| "stranger".to_string());
    lv.debug(format!("greeting {name}"));
    lv.put_cookie("greeted", &name, true);

    let path = lv.path().to_string();
    lv.go(move |lv| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let statement = format!(
            "INSERT INTO visits (path) VALUES ('{}')",
            path.replace('\'', "''")
        );
        lv.execute(&statement).await?;
        lv.print("visit recorded");
        anyhow::Ok(())
    });

    format!("hello, {name}")
}

async fn soon(lv: Lv) -> axum::response::Response {
    lv.tba()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config = config.port(port);
    }
    if cli.production {
        config = config.production(true);
    }
    if let Some(domain) = cli.domain {
        config = config.domain(domain);
    }
    if let Some(url) = cli.database_url {
        config = config.database_url(url);
    }

    let store: Arc<dyn RelationalStore> = if cli.memory {
        info!("store: memory");
        Arc::new(MemoryStore::new())
    } else {
        let url = config
            .database_url
            .clone()
            .context("DATABASE_URL is not set; pass --database-url or --memory")?;
        info!(url = ?config.redacted_database_url(), "store: postgres");
        Arc::new(
            PgStore::connect(&url, cli.max_connections)
                .await
                .context("failed to connect to PostgreSQL")?,
        )
    };

    let app = App::with_store(config, store)
        .register([Arc::new(Users) as Arc<dyn Model>, Arc::new(Visits)])
        .context("failed to register models")?
        .get("/hello", hello)
        .get("/soon", soon);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => app.wake().await.context("failed to wake")?,
        Command::Migrate => {
            let report = app.migrate().await?;
            for outcome in &report.outcomes {
                println!("{:>8} {} {} -> {}", "TABLE", outcome.table, outcome.from, outcome.to);
            }
        }
        Command::Down { table, to } => {
            let outcome = app.migrate_down(&table, to).await?;
            println!("{:>8} {} {} -> {}", "TABLE", outcome.table, outcome.from, outcome.to);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leviathan=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
