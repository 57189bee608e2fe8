use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::json;
use sqlx::SqlitePool;

use petconnect::audit::{append_record, create_audit_record, verify_chain, ConsoleSink};
use petconnect::authz::{allowed_actions, Action, Resource, Role};
use petconnect::db;
use petconnect::utils::utc_now;

#[derive(Parser, Debug)]
#[command(author, version, about = "PetConnect operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Assign a role to an account (audited with actor `cli`)
    SetRole {
        #[arg(long)]
        email: String,
        /// user, moderator or admin
        #[arg(long)]
        role: String,
    },
    /// Print the permission matrix
    Matrix,
    /// Re-hash the audit trail and report the first broken link
    AuditVerify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::SetRole { email, role } => {
            let role: Role = role.parse()?;
            let pool = get_pool().await?;
            set_role(&pool, &email, role).await?;
        }
        Commands::Matrix => print_matrix(),
        Commands::AuditVerify => {
            let pool = get_pool().await?;
            let report = verify_chain(&pool).await?;
            match report.broken_at {
                None => println!("audit chain valid ({} entries)", report.entries),
                Some(seq) => anyhow::bail!("audit chain broken at seq {} ({} entries)", seq, report.entries),
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn set_role(pool: &SqlitePool, email: &str, role: Role) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT id, role FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(&email)
            .fetch_optional(pool)
            .await?;
    let (user_id, previous) = row.with_context(|| format!("no account with email {email}"))?;

    if previous == role.as_str() {
        println!("{email} already has role {role}");
        return Ok(());
    }

    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(utc_now())
        .bind(&user_id)
        .execute(pool)
        .await?;

    // no background listener in a one-shot process: persist the record directly
    let record = create_audit_record(
        &ConsoleSink,
        "cli",
        Action::Update,
        Resource::Users,
        user_id.as_str(),
        Some(json!({ "role": previous })),
        Some(json!({ "role": role.as_str() })),
    );
    append_record(pool, &record).await?;

    println!("{email}: {previous} -> {role}");
    Ok(())
}

fn print_matrix() {
    print!("{:<10}", "role");
    for resource in Resource::ALL {
        print!(" {:<42}", resource.as_str());
    }
    println!();

    for role in Role::ALL {
        print!("{:<10}", role.as_str());
        for resource in Resource::ALL {
            let actions: Vec<&str> = allowed_actions(role, resource).iter().map(Action::as_str).collect();
            let cell = if actions.is_empty() { "-".to_string() } else { actions.join(",") };
            print!(" {:<42}", cell);
        }
        println!();
    }
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let has_table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if has_table.is_some() {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
