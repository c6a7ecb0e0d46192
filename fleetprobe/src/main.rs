use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use enrichment::{run_scan, Discovery, ProbeSet};
use host_discovery::DnsResolver;
use management::{UncShare, WsManClient};
use port_scan::TcpPortProbe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod export;
mod inventory;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Table, Csv, Json }

#[derive(Debug, Parser)]
#[command(name = "fleetprobe", version, about = "Directory host reachability and service inventory")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./fleetprobe.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Resolve, ping and probe every host in a directory export.
    ///
    /// Management queries authenticate with HTTP Basic only; hosts whose WinRM
    /// listener refuses Basic report WMI=False and retrieval-failed dates.
    Scan {
        /// CSV export of the directory query (DNSHostName,Name,OperatingSystem,OperatingSystemVersion)
        #[arg(long, value_name = "FILE")]
        inventory: PathBuf,
        /// Output format: table (stdout), csv (timestamped file), or json (stdout)
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Directory for the CSV export
        #[arg(long, value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose { 0 => "info", 1 => "debug", _ => "trace" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Version => {
            println!("fleetprobe {} (core {})", env!("CARGO_PKG_VERSION"), fleetprobe_core::version());
        }
        Commands::Scan { inventory, format, out_dir } => {
            let cfg = config::load_config(cli.config.as_deref())?;
            let settings = Arc::new(cfg.scan_settings()?);
            let hosts = inventory::load_inventory(&inventory)?;
            let reach_ports = cfg.reachability_ports()?;

            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(async {
                let discovery = Discovery {
                    resolver: Arc::new(DnsResolver { timeout: settings.probe_timeout }),
                    reachability: host_discovery::reachability_probe(
                        cfg.reachability_method(),
                        &reach_ports,
                        settings.probe_timeout,
                    ),
                };
                let probes = ProbeSet {
                    ports: Arc::new(TcpPortProbe::new(settings.probe_timeout)),
                    management: Arc::new(WsManClient::new(cfg.management_options(&settings))?),
                    share: Arc::new(UncShare::new(cfg.admin_share(), settings.management_timeout)),
                };
                anyhow::Ok(run_scan(hosts, discovery, probes, settings.clone()).await)
            })?;

            info!(
                inventory = report.inventory_count,
                reachable = report.reachable.len(),
                reported = report.records.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "scan complete"
            );

            let labels: Vec<&str> = settings.ports.labels().collect();
            match format {
                OutputFormat::Table => print!("{}", export::render_table(&labels, &report.records)),
                OutputFormat::Json => export::write_json(std::io::stdout().lock(), &report.records)?,
                OutputFormat::Csv => {
                    let path = export::write_csv_file(&out_dir, report.scan_timestamp, &labels, &report.records)?;
                    info!(path = %path.display(), rows = report.records.len(), "report written");
                }
            }
        }
    }
    Ok(())
}
