mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::RunnerConfig;
use routing::{Router, Task};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Route or execute a single task across the configured providers.
#[derive(Debug, Parser)]
#[command(name = "route-runner", version)]
struct Args {
    /// TOML config with a `[router]` section and `[[providers]]` entries.
    /// Without one, a single no-op `echo` provider is registered.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "chat")]
    task_type: String,

    /// Task payload.
    #[arg(long)]
    content: String,

    /// 0..=10; 8 and above earns extra attempts.
    #[arg(long)]
    priority: Option<u8>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Follow confident analytics recommendations.
    #[arg(long)]
    analytics: bool,

    /// Print the routing decision without executing.
    #[arg(long)]
    route_only: bool,

    /// Probe every provider before routing.
    #[arg(long)]
    health: bool,
}

impl Args {
    fn task(&self) -> Task {
        let mut task = Task::new(&self.task_type, &self.content);
        if let Some(p) = self.priority {
            task = task.with_priority(p);
        }
        if let Some(secs) = self.timeout_secs {
            task = task.with_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_retries {
            task = task.with_max_retries(n);
        }
        task
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::fallback()?,
    };

    let router = Router::new(config.router.clone());
    for entry in &config.providers {
        let provider = entry.build()?;
        router
            .register_with_profile(entry.name.clone(), provider, entry.profile())
            .with_context(|| format!("failed to register '{}'", entry.name))?;
    }
    if args.analytics {
        router.enable_analytics();
    }
    info!(
        providers = router.providers().len(),
        policies = router.policies().len(),
        analytics = router.analytics_enabled(),
        "router ready"
    );

    if args.health {
        for (name, healthy) in router.check_health().await {
            if healthy {
                info!(provider = %name, "healthy");
            } else {
                warn!(provider = %name, "health check failed");
            }
        }
    }

    let task = args.task();
    if args.route_only {
        let decision = router.route(&task)?;
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    let outcome = router.execute(&task).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let spend = router.spend_summary();
    info!(total_usd = spend.total, entries = spend.entries, "spend in window");
    if let Some(budget) = router.budget_status() {
        info!(state = ?budget.state, utilization = budget.utilization, "budget");
    }
    Ok(())
}
