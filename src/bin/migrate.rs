//! Operator tool for schema migrations.
//!
//! Usage: migrate [--dir PATH] <status [--json] | public | tenants | tenant SLUG | all>

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use archify_api::{
    config::Config,
    db,
    error::TenancyError,
    migrations::{MigrationRegistry, MigrationStatus, Migrator, SchemaReport},
};

#[derive(Parser)]
#[command(name = "migrate", about = "Apply and inspect public and tenant schema migrations")]
struct Args {
    /// Read migrations from this directory instead of the compiled-in catalog
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show applied and pending versions per schema
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Migrate the public schema
    Public,
    /// Migrate every provisioned tenant schema
    Tenants,
    /// Migrate a single tenant
    Tenant { slug: String },
    /// Public first, then every tenant
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url, 5).await?;
    let dir = args.dir.or(config.migrations_dir);
    let registry = MigrationRegistry::load(dir.as_deref())?;
    let migrator = Migrator::new(pool, Arc::new(registry), config.migration_concurrency);

    let ok = match args.command {
        Command::Status { json } => {
            let status = migrator.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            true
        }
        Command::Public => run_public(&migrator).await,
        Command::Tenants => run_tenants(&migrator).await?,
        Command::Tenant { slug } => match migrator.migrate_tenant(&slug).await {
            Ok(applied) => {
                println!("✓ {slug}: {} applied", applied.len());
                true
            }
            Err(TenancyError::NotFound(_)) => {
                eprintln!("✗ no tenant with slug '{slug}'");
                false
            }
            Err(e) => {
                eprintln!("✗ {slug}: {e}");
                false
            }
        },
        Command::All => {
            // Tenant migrations may depend on public objects.
            run_public(&migrator).await && run_tenants(&migrator).await?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run_public(migrator: &Migrator) -> bool {
    print_report(&migrator.run_schema("public").await)
}

async fn run_tenants(migrator: &Migrator) -> anyhow::Result<bool> {
    let reports = migrator.migrate_all_tenants().await?;
    let mut ok = true;
    for report in &reports {
        ok &= print_report(report);
    }
    let failed = reports.iter().filter(|r| !r.is_success()).count();
    println!("{} tenant schema(s), {} failed", reports.len(), failed);
    Ok(ok)
}

fn print_report(report: &SchemaReport) -> bool {
    match &report.failure {
        None => {
            println!("✓ {}: {} applied", report.schema, report.applied.len());
            true
        }
        Some(failure) => {
            eprintln!(
                "✗ {}: {} applied, then {}",
                report.schema,
                report.applied.len(),
                failure.error
            );
            false
        }
    }
}

fn print_status(status: &MigrationStatus) {
    let line = |label: &str, applied: usize, pending: &[String]| {
        let mark = if pending.is_empty() { "✓" } else { "…" };
        println!("{mark} {label}: {applied} applied, {} pending", pending.len());
        for version in pending {
            println!("    - {version}");
        }
    };

    line(&status.public.schema, status.public.applied.len(), &status.public.pending);
    for tenant in &status.tenants {
        let label = if tenant.is_active {
            tenant.status.schema.clone()
        } else {
            format!("{} (inactive)", tenant.status.schema)
        };
        line(&label, tenant.status.applied.len(), &tenant.status.pending);
    }

    if !status.incomplete.is_empty() {
        println!("\nTenants whose creation never completed (schema may be orphaned):");
        for slug in &status.incomplete {
            println!("  ✗ {slug}");
        }
    }
}
