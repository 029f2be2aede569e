use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use proxy_verify::proxy::{
    BatchConfig, Candidate, CheckerConfig, GeoConfig, LinkParser, ProtocolConfig, ProviderEndpoint,
    ProxyChecker, ProxyRegistry, RescanPolicy, SubscriptionConfig, SubscriptionFetcher,
    SupervisorConfig, ThroughputConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Verifies proxy links through a local proxy core and tracks their history
#[derive(Parser)]
#[command(name = "proxy-verify")]
#[command(about = "Verifies proxy links through a local proxy core and tracks their history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify due candidates, update the registry and write a run report
    Check(CheckArgs),
    /// Print identities and display names parsed from a link file
    Parse {
        /// Input file containing proxy links
        input: PathBuf,
        /// Scheme for bare host:port lines
        #[arg(long, default_value = "socks5")]
        default_scheme: String,
    },
    /// Print the registry with status, failure streak and next due time
    Status {
        /// Registry file path
        #[arg(short, long, default_value = "proxies.json")]
        registry: PathBuf,
        #[command(flatten)]
        rescan: RescanArgs,
    },
}

#[derive(Args)]
struct CheckArgs {
    /// Files containing proxy links, one per line
    inputs: Vec<PathBuf>,
    /// Subscription URLs (can specify multiple)
    #[arg(short, long)]
    subscription: Vec<String>,
    /// Scheme for bare host:port lines
    #[arg(long, default_value = "socks5")]
    default_scheme: String,
    /// Registry file path
    #[arg(short, long, default_value = "proxies.json")]
    registry: PathBuf,
    /// Directory for run reports
    #[arg(long, default_value = "reports")]
    reports_dir: PathBuf,
    /// Check every candidate, ignoring the rescan schedule
    #[arg(long)]
    force: bool,

    /// First local port; endpoint i gets base + i
    #[arg(long, default_value = "20000")]
    base_port: u16,
    /// Number of concurrent verifications
    #[arg(short = 'n', long, default_value = "10")]
    concurrency: usize,
    /// Whole-endpoint budget in seconds (0 disables)
    #[arg(long, default_value = "180")]
    task_timeout: u64,

    /// Proxy core executable
    #[arg(long, default_value = "xray")]
    xray_bin: PathBuf,
    /// Proxy core arguments; {config} is replaced with the config path
    #[arg(long, num_args = 1.., allow_hyphen_values = true, default_values_t = ["run".to_string(), "-c".to_string(), "{config}".to_string()])]
    xray_args: Vec<String>,
    /// Directory for generated core configs (defaults to the temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Startup timeout in seconds
    #[arg(long, default_value = "10")]
    startup_timeout: u64,
    /// Delay after readiness before probing, in milliseconds
    #[arg(long, default_value = "500")]
    settle_delay_ms: u64,
    /// Silence after which a live process counts as ready, in milliseconds (0 disables)
    #[arg(long, default_value = "3000")]
    liveness_grace_ms: u64,
    /// Wait between graceful termination and kill, in milliseconds
    #[arg(long, default_value = "2000")]
    teardown_grace_ms: u64,

    /// Per-probe timeout in seconds
    #[arg(long, default_value = "10")]
    probe_timeout: u64,
    /// Probe providers as name=url (replaces the defaults)
    #[arg(long)]
    provider: Vec<String>,
    /// Geo provider priority for fallback resolution
    #[arg(long, value_delimiter = ',')]
    geo_priority: Vec<String>,
    /// Path to a MaxMind City database
    #[arg(long)]
    mmdb: Option<String>,

    /// Skip throughput measurement
    #[arg(long)]
    no_throughput: bool,
    /// Throughput timeout in seconds
    #[arg(long, default_value = "30")]
    throughput_timeout: u64,
    /// Throughput download URL
    #[arg(long)]
    download_url: Option<String>,
    /// Throughput upload URL
    #[arg(long)]
    upload_url: Option<String>,

    #[command(flatten)]
    rescan: RescanArgs,
}

#[derive(Args)]
struct RescanArgs {
    /// Highest failure streak rescanned on the daily interval
    #[arg(long, default_value = "6")]
    daily_max_streak: u32,
    /// Highest failure streak rescanned on the weekly interval
    #[arg(long, default_value = "29")]
    weekly_max_streak: u32,
    /// Daily interval in hours
    #[arg(long, default_value = "24")]
    daily_interval_hours: i64,
    /// Weekly interval in days
    #[arg(long, default_value = "7")]
    weekly_interval_days: i64,
    /// Monthly interval in days
    #[arg(long, default_value = "30")]
    monthly_interval_days: i64,
}

impl RescanArgs {
    fn policy(&self) -> RescanPolicy {
        RescanPolicy::from_bounds(
            self.daily_max_streak,
            self.weekly_max_streak,
            chrono::Duration::hours(self.daily_interval_hours),
            chrono::Duration::days(self.weekly_interval_days),
            chrono::Duration::days(self.monthly_interval_days),
        )
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "proxy_verify=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Check(args) => run_check(args).await?,
        Commands::Parse {
            input,
            default_scheme,
        } => {
            let candidates = LinkParser::dedup(LinkParser::parse_file(&input, &default_scheme)?);
            println!("Parsed {} links from {:?}", candidates.len(), input);
            for candidate in &candidates {
                println!("{}", candidate);
            }
        }
        Commands::Status { registry, rescan } => {
            let registry = ProxyRegistry::load(&registry);
            let policy = rescan.policy();
            let now = Utc::now();

            if registry.is_empty() {
                println!("Registry is empty.");
            }
            for entry in registry.all() {
                let next = match policy.next_due_at(entry) {
                    Some(at) if at > now => at.to_rfc3339(),
                    _ => "due".to_string(),
                };
                println!(
                    "{:<8} streak {:<3} checks {:<4} next {}  {}",
                    entry.status().to_string(),
                    entry.failure_streak(),
                    entry.checks().len(),
                    next,
                    entry.identity
                );
            }
        }
    }

    Ok(())
}

async fn load_candidates(args: &CheckArgs) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    for input in &args.inputs {
        match LinkParser::parse_file(input, &args.default_scheme) {
            Ok(parsed) => {
                info!("Loaded {} links from {:?}", parsed.len(), input);
                candidates.extend(parsed);
            }
            Err(e) => warn!("Cannot read {:?}: {}", input, e),
        }
    }

    if !args.subscription.is_empty() {
        let fetcher = SubscriptionFetcher::with_config(
            SubscriptionConfig::new().with_default_scheme(args.default_scheme.clone()),
        )?;
        for result in fetcher.fetch_all(&args.subscription).await {
            candidates.extend(result.candidates);
        }
    }

    Ok(LinkParser::dedup(candidates))
}

fn checker_config(args: &CheckArgs) -> Result<CheckerConfig> {
    let mut supervisor = SupervisorConfig::new()
        .with_program(args.xray_bin.clone())
        .with_args(args.xray_args.clone())
        .with_startup_timeout(Duration::from_secs(args.startup_timeout))
        .with_settle_delay(Duration::from_millis(args.settle_delay_ms))
        .with_liveness_grace(
            Some(Duration::from_millis(args.liveness_grace_ms)).filter(|d| !d.is_zero()),
        )
        .with_teardown_grace(Duration::from_millis(args.teardown_grace_ms));
    if let Some(dir) = &args.work_dir {
        std::fs::create_dir_all(dir)?;
        supervisor = supervisor.with_work_dir(dir.clone());
    }

    let providers = if args.provider.is_empty() {
        ProviderEndpoint::defaults()
    } else {
        let mut providers = Vec::with_capacity(args.provider.len());
        for pair in &args.provider {
            match ProviderEndpoint::parse(pair) {
                Some(provider) => providers.push(provider),
                None => bail!("Invalid provider {:?}, expected name=url", pair),
            }
        }
        providers
    };

    let mut geo = GeoConfig::new();
    if !args.geo_priority.is_empty() {
        geo = geo.with_priority(args.geo_priority.clone());
    }
    if let Some(path) = &args.mmdb {
        geo = geo.with_mmdb_path(path.clone());
    }

    let throughput = if args.no_throughput {
        None
    } else {
        let mut throughput = ThroughputConfig::new();
        if let Some(url) = &args.download_url {
            throughput = throughput.with_download_url(url.clone());
        }
        if let Some(url) = &args.upload_url {
            throughput = throughput.with_upload_url(url.clone());
        }
        Some(throughput)
    };

    Ok(CheckerConfig::new()
        .with_supervisor(supervisor)
        .with_protocol(
            ProtocolConfig::new().with_probe_timeout(Duration::from_secs(args.probe_timeout)),
        )
        .with_batch(
            BatchConfig::new()
                .with_base_port(args.base_port)
                .with_concurrency(args.concurrency)
                .with_task_timeout(
                    Some(Duration::from_secs(args.task_timeout)).filter(|d| !d.is_zero()),
                ),
        )
        .with_rescan(args.rescan.policy())
        .with_geo(geo)
        .with_providers(providers)
        .with_throughput(throughput)
        .with_throughput_timeout(Duration::from_secs(args.throughput_timeout))
        .with_force(args.force))
}

async fn run_check(args: CheckArgs) -> Result<()> {
    let candidates = load_candidates(&args).await?;
    if candidates.is_empty() {
        bail!("No candidate links loaded");
    }
    info!("Loaded {} unique candidates", candidates.len());

    let checker = ProxyChecker::with_config(checker_config(&args)?);
    let mut registry = ProxyRegistry::load(&args.registry);

    let report = checker.run(&candidates, &mut registry, Utc::now()).await;

    if let Err(e) = registry.save() {
        error!("Failed to save registry {:?}: {}", args.registry, e);
    }
    if let Err(e) = report.write_to(&args.reports_dir) {
        error!("Failed to write report to {:?}: {}", args.reports_dir, e);
    }

    println!(
        "Results: {} tested, {} working, {} failed, {} not due",
        report.total,
        report.working,
        report.failed,
        report.skipped()
    );

    let working: Vec<_> = report.outcomes.iter().filter(|o| o.entry.success).collect();
    if !working.is_empty() {
        println!("\nWorking proxies:");
        for outcome in working {
            let entry = &outcome.entry;
            let latency = entry
                .latency_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms));
            let speed = entry.throughput.as_ref().map_or_else(String::new, |t| {
                format!(" {:.2}/{:.2} Mbps", t.download_mbps, t.upload_mbps)
            });
            println!(
                "  {} ({}, {}{}{})",
                if outcome.display_name.is_empty() {
                    &outcome.identity
                } else {
                    &outcome.display_name
                },
                latency,
                entry.geo.short_display(),
                speed,
                if entry.insecure_mode_used { ", insecure" } else { "" }
            );
        }
    }

    Ok(())
}
