//! golden-repos CLI entry point

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use golden_repos::cli::{
    Cli, Commands, OutputFormat, RegisterArgs, ServeArgs, SweepArgs, UnregisterArgs,
};
use golden_repos::git::git_command;
use golden_repos::{
    canonical_alias, classify_origin, validate_repo_name, GoldenRepoError, GoldenReposConfig,
    JobQueue, RefreshContext, RefreshScheduler, SnapshotCleanup, WorkerPool,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };
    init_logging(&config, cli.verbose);

    match run(&cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<GoldenRepoError>()
                .map(GoldenRepoError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

fn load_config(path: Option<&Path>) -> golden_repos::Result<GoldenReposConfig> {
    match path {
        Some(path) => GoldenReposConfig::load_from(path),
        None => GoldenReposConfig::load(),
    }
}

fn init_logging(config: &GoldenReposConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("golden_repos={}", level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, config: GoldenReposConfig) -> anyhow::Result<()> {
    let context = Arc::new(RefreshContext::from_config(&config)?);

    match &cli.command {
        Commands::Serve(args) => run_serve(cli, args, config, context),
        Commands::Reconcile => {
            let report = context.reconcile_golden_repos()?;
            match cli.format {
                OutputFormat::Json => print_json(&json!({
                    "restored": report.restored.iter()
                        .map(|(alias, from)| json!({"alias": alias, "from": from}))
                        .collect::<Vec<_>>(),
                    "healthy": report.healthy,
                    "skipped_local": report.skipped_local,
                    "failures": report.failures.iter()
                        .map(|(alias, error)| json!({"alias": alias, "error": error}))
                        .collect::<Vec<_>>(),
                }))?,
                OutputFormat::Text => {
                    for (alias, from) in &report.restored {
                        println!("restored  {} from {}", alias, from.display());
                    }
                    for alias in &report.healthy {
                        println!("healthy   {}", alias);
                    }
                    for alias in &report.skipped_local {
                        println!("local     {}", alias);
                    }
                    for (alias, error) in &report.failures {
                        println!("FAILED    {}: {}", alias, error);
                    }
                }
            }
            if report.failures.is_empty() {
                Ok(())
            } else {
                let (alias, message) = report.failures[0].clone();
                Err(GoldenRepoError::ReconciliationFailure { alias, message }.into())
            }
        }
        Commands::Refresh(args) => {
            let record = context.registry.resolve_global_repo(&args.identifier)?;
            let outcome = context.refresh_repo(&record)?;
            match cli.format {
                OutputFormat::Json => print_json(&json!({
                    "alias": outcome.alias,
                    "status": outcome.status.as_str(),
                    "target_path": outcome.target_path,
                    "previous_target": outcome.previous_target,
                    "revision": outcome.revision,
                    "detail": outcome.detail,
                    "elapsed_ms": outcome.elapsed.as_millis() as u64,
                }))?,
                OutputFormat::Text => {
                    println!("{}: {} ({})", outcome.alias, outcome.status, outcome.detail)
                }
            }
            Ok(())
        }
        Commands::Register(args) => run_register(cli, args, &config, &context),
        Commands::Unregister(args) => run_unregister(args, &context),
        Commands::List => run_list(cli, &context),
        Commands::Resolve(args) => {
            let alias = context.registry.resolve_global_alias(&args.identifier)?;
            let target = context.aliases.read_alias(&alias)?;
            match cli.format {
                OutputFormat::Json => print_json(&json!({"alias": alias, "target_path": target}))?,
                OutputFormat::Text => match target {
                    Some(target) => println!("{} -> {}", alias, target.display()),
                    None => println!("{} (not yet published)", alias),
                },
            }
            Ok(())
        }
        Commands::Sweep(args) => run_sweep(cli, args, &config, &context),
    }
}

fn run_serve(
    cli: &Cli,
    args: &ServeArgs,
    config: GoldenReposConfig,
    context: Arc<RefreshContext>,
) -> anyhow::Result<()> {
    if !args.no_reconcile {
        let report = context.reconcile_golden_repos()?;
        if !report.failures.is_empty() {
            tracing::warn!(
                "{} repo(s) could not be reconciled, continuing",
                report.failures.len()
            );
        }
    }

    let threads = args.workers.unwrap_or(config.workers.threads);
    let pool = Arc::new(WorkerPool::new(threads)?);
    let queue: Arc<dyn JobQueue> = pool.clone();
    let scheduler = Arc::new(RefreshScheduler::new(context, Some(queue), Arc::new(config)));
    let handle = scheduler.start()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down, waiting for in-flight refresh jobs");
    handle.stop();
    pool.shutdown();

    let stats = scheduler.stats();
    if cli.format == OutputFormat::Json {
        print_json(&json!({
            "ticks": stats.ticks,
            "jobs_submitted": stats.jobs_submitted,
            "local_skips": stats.local_skips,
            "duplicate_suppressions": stats.duplicate_suppressions,
            "tick_failures": stats.tick_failures,
        }))?;
    }
    Ok(())
}

fn run_register(
    cli: &Cli,
    args: &RegisterArgs,
    config: &GoldenReposConfig,
    context: &RefreshContext,
) -> anyhow::Result<()> {
    validate_repo_name(&args.name)?;
    let alias = args
        .alias
        .clone()
        .unwrap_or_else(|| canonical_alias(&args.name));
    let master_path = args
        .path
        .clone()
        .unwrap_or_else(|| config.masters_dir().join(&args.name));
    let kind = classify_origin(args.origin.as_deref());

    if kind.is_remote() && !master_path.exists() && !args.no_clone {
        if let Some(origin) = args.origin.as_deref() {
            if let Some(parent) = master_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let dest = master_path.to_string_lossy().into_owned();
            tracing::info!("Cloning {} into {}", origin, dest);
            git_command(&["clone", "--quiet", origin, dest.as_str()], None)?;
        }
    }

    let record = context.registry.register_global_repo(
        &args.name,
        &alias,
        args.origin.as_deref(),
        &master_path,
        args.allow_reserved,
    )?;

    // Local repos are served from their live directory straight away
    if !kind.is_remote() && master_path.is_dir() {
        context
            .aliases
            .create_alias(&alias, &master_path, &args.name)?;
    }

    match cli.format {
        OutputFormat::Json => print_json(&json!({
            "alias": record.alias,
            "repo_name": record.repo_name,
            "kind": record.kind().to_string(),
            "origin": record.origin,
            "master_path": record.master_path,
        }))?,
        OutputFormat::Text => println!(
            "Registered {} ({}) at {}",
            record.alias,
            record.kind(),
            record.master_path.display()
        ),
    }
    Ok(())
}

fn run_unregister(args: &UnregisterArgs, context: &RefreshContext) -> anyhow::Result<()> {
    let alias = context.registry.resolve_global_alias(&args.identifier)?;
    let _guard = context
        .locks
        .lock(&alias, "unregister", context.settings.lock_timeout)?;
    let record = context.registry.unregister(&alias)?;
    if !args.keep_alias {
        context.aliases.delete_alias(&alias)?;
    }
    println!("Unregistered {}", record.alias);
    Ok(())
}

fn run_list(cli: &Cli, context: &RefreshContext) -> anyhow::Result<()> {
    let repos = context.registry.list_global_repos()?;
    let mut rows = Vec::with_capacity(repos.len());
    for repo in repos {
        let alias = context.aliases.get_record(&repo.alias)?;
        rows.push((repo, alias));
    }

    match cli.format {
        OutputFormat::Json => print_json(&json!(rows
            .iter()
            .map(|(repo, alias)| json!({
                "alias": repo.alias,
                "repo_name": repo.repo_name,
                "kind": repo.kind().to_string(),
                "origin": repo.origin,
                "master_path": repo.master_path,
                "target_path": alias.as_ref().map(|a| &a.target_path),
                "revision": alias.as_ref().and_then(|a| a.revision.as_ref()),
                "last_refresh": alias.as_ref().map(|a| a.last_refresh),
            }))
            .collect::<Vec<_>>()))?,
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No golden repos registered");
            }
            for (repo, alias) in &rows {
                let target = alias
                    .as_ref()
                    .map(|a| a.target_path.display().to_string())
                    .unwrap_or_else(|| "(not published)".to_string());
                println!("{:<32} {:<10} {}", repo.alias, repo.kind(), target);
            }
        }
    }
    Ok(())
}

fn run_sweep(
    cli: &Cli,
    args: &SweepArgs,
    config: &GoldenReposConfig,
    context: &RefreshContext,
) -> anyhow::Result<()> {
    let grace = if args.all {
        Duration::ZERO
    } else {
        config.snapshot_grace()
    };
    let cleanup = SnapshotCleanup::new(grace);
    let repo_names: Vec<String> = context
        .registry
        .list_global_repos()?
        .into_iter()
        .map(|r| r.repo_name)
        .collect();
    cleanup.mark_orphans(&context.snapshotter, &repo_names, &context.aliases)?;
    let report = cleanup.sweep(&context.aliases)?;

    match cli.format {
        OutputFormat::Json => print_json(&json!({
            "removed": report.removed,
            "pending": report.pending,
            "failed": report.failed.iter()
                .map(|(path, error)| json!({"path": path, "error": error}))
                .collect::<Vec<_>>(),
        }))?,
        OutputFormat::Text => {
            for path in &report.removed {
                println!("removed {}", path.display());
            }
            println!(
                "{} removed, {} within grace period, {} failed",
                report.removed.len(),
                report.pending,
                report.failed.len()
            );
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("JSON serialization failed")?
    );
    Ok(())
}
