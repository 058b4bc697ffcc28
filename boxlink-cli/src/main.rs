//! Boxlink CLI
//!
//! Offline tools around the controller: validate and adapt engine
//! configurations, preview rule merges, probe servers and generate settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boxlink_config::{merge_rules, ConfigDocument, RuleDocument, Schema};
use boxlink_engine::{
    adapt_config, Controller, Diagnostics, DiagnosticsSettings, ProbeTarget, Settings,
    UnlinkedEngine,
};
use boxlink_platform::{adapter_for, TargetOs, TunnelDescriptor};

/// Boxlink - lifecycle controller for an embedded proxy engine
#[derive(Parser)]
#[command(name = "boxlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to controller settings
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the engine would accept a configuration
    Check {
        config: PathBuf,

        /// Platform whose rewrites are applied first
        #[arg(short, long)]
        target: Option<TargetOs>,

        #[arg(long, value_enum, default_value_t = Revision::Current)]
        schema: Revision,
    },

    /// Print the configuration a reload would produce
    Merge {
        config: PathBuf,

        /// Rule document in JSON, in the order it was added
        #[arg(short, long = "rule")]
        rules: Vec<String>,
    },

    /// Print a configuration after platform rewrites
    Adapt {
        config: PathBuf,

        #[arg(short, long, default_value = "android")]
        target: TargetOs,

        /// Tunnel descriptor to inject
        #[arg(long)]
        fd: Option<i32>,

        #[arg(long, value_enum, default_value_t = Revision::Current)]
        schema: Revision,
    },

    /// Probe a server handshake
    Probe {
        #[command(subcommand)]
        protocol: ProbeProtocol,
    },

    /// Generate a sample settings file
    GenSettings {
        /// Output path for the settings file
        #[arg(short, long, default_value = "boxlink.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProbeProtocol {
    /// TLS over TCP
    Tls(ProbeArgs),
    /// QUIC, offering h3, tuic, hysteria and hysteria2 unless --alpn is given
    Quic(ProbeArgs),
}

#[derive(Args)]
struct ProbeArgs {
    host: String,

    port: u16,

    /// Server name, defaults to the host
    #[arg(long)]
    sni: Option<String>,

    /// Accept any certificate
    #[arg(long)]
    insecure: bool,

    /// Comma separated ALPN list
    #[arg(long)]
    alpn: Option<String>,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

/// Engine schema revision to validate against
#[derive(Clone, Copy, ValueEnum)]
enum Revision {
    Current,
    Legacy,
}

impl Revision {
    fn schema(self) -> Schema {
        match self {
            Revision::Current => Schema::current(),
            Revision::Legacy => Schema::legacy(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Check {
            config,
            target,
            schema,
        } => check(cli.settings.as_deref(), &config, target, schema),
        Commands::Merge { config, rules } => merge(&config, &rules),
        Commands::Adapt {
            config,
            target,
            fd,
            schema,
        } => adapt(&config, target, fd, schema),
        Commands::Probe { protocol } => probe(cli.settings.as_deref(), protocol),
        Commands::GenSettings { output } => generate_settings(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Settings from `path`, or defaults without the diagnostics file
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {:?}", path)),
        None => Ok(Settings {
            diagnostics: DiagnosticsSettings {
                file_enabled: false,
                file: None,
            },
            ..Settings::default()
        }),
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration from {:?}", path))
}

fn controller(
    settings: Option<&Path>,
    target: Option<TargetOs>,
    revision: Revision,
) -> Result<Controller> {
    let platform = target.map_or_else(boxlink_platform::native, adapter_for);
    let controller = Controller::builder(Arc::new(UnlinkedEngine::new(revision.schema())))
        .platform(platform)
        .settings(load_settings(settings)?)
        .build()
        .context("Failed to set up controller")?;
    controller.register_log_receiver(Some(Arc::new(|line: &str| debug!("{}", line))));
    Ok(controller)
}

fn check(
    settings: Option<&Path>,
    path: &Path,
    target: Option<TargetOs>,
    revision: Revision,
) -> Result<()> {
    let text = read_config(path)?;
    let controller = controller(settings, target, revision)?;
    controller
        .test_config(&text)
        .with_context(|| format!("{:?} rejected", path))?;
    println!("{}: ok", path.display());
    Ok(())
}

fn merge(path: &Path, rules: &[String]) -> Result<()> {
    let base = read_config(path)?;
    let rules = rules
        .iter()
        .map(|rule| RuleDocument::parse(rule).with_context(|| format!("Invalid rule {}", rule)))
        .collect::<Result<Vec<_>>>()?;

    let merged = merge_rules(Some(&base), None, &rules).context("Failed to merge rules")?;
    println!("{}", ConfigDocument::parse(&merged)?.to_pretty_text()?);
    Ok(())
}

fn adapt(path: &Path, target: TargetOs, fd: Option<i32>, revision: Revision) -> Result<()> {
    let text = read_config(path)?;
    let capabilities = adapter_for(target).capabilities();
    let descriptor = fd
        .map(TunnelDescriptor::new)
        .transpose()
        .context("Invalid tunnel descriptor")?;

    let diagnostics = Diagnostics::new(true, None);
    diagnostics.register(Some(Arc::new(|line: &str| info!("{}", line))));

    let schema = revision.schema();
    let adaptation = adapt_config(&text, &capabilities, descriptor, &diagnostics, |candidate| {
        schema.parse(candidate).map(|_| ())
    });

    info!(
        "target={} descriptor_key={} auto_detect={}",
        target,
        adaptation.descriptor_placement.as_deref().unwrap_or("-"),
        adaptation.auto_detect.as_deref().unwrap_or("-")
    );
    println!("{}", ConfigDocument::parse(&adaptation.text)?.to_pretty_text()?);
    Ok(())
}

fn probe(settings: Option<&Path>, protocol: ProbeProtocol) -> Result<()> {
    let controller = controller(settings, None, Revision::Current)?;
    let (name, args) = match &protocol {
        ProbeProtocol::Tls(args) => ("tls", args),
        ProbeProtocol::Quic(args) => ("quic", args),
    };

    let mut target = ProbeTarget::new(&args.host, args.port)
        .insecure(args.insecure)
        .with_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(sni) = &args.sni {
        target = target.with_sni(sni);
    }
    if let Some(alpn) = &args.alpn {
        target = target.with_alpn_csv(alpn);
    }

    let report = match &protocol {
        ProbeProtocol::Tls(_) => controller.probe_tls(&target),
        ProbeProtocol::Quic(_) => controller.probe_quic(&target),
    }
    .with_context(|| format!("{} probe to {}:{} failed", name, args.host, args.port))?;

    println!(
        "{} {}:{} ok in {} ms, alpn={}",
        name,
        args.host,
        args.port,
        report.elapsed.as_millis(),
        report.alpn.as_deref().unwrap_or("none")
    );
    Ok(())
}

fn generate_settings(output: PathBuf) -> Result<()> {
    std::fs::write(&output, Settings::sample())
        .with_context(|| format!("Failed to write settings to {:?}", output))?;

    info!("Generated sample settings at {:?}", output);
    println!("Sample settings written to {:?}", output);
    Ok(())
}
