use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "astra")]
#[command(version)]
#[command(about = "Discover, fingerprint and assess network services", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan hosts and route findings to web scanning and credential testing
    Scan(ScanArgs),
}

/// Options left unset fall back to the config file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Targets, comma separated. Example: 10.0.0.1,10.0.1.0/24,10.0.2.1-20,example.com
    #[arg(short = 't', long, required_unless_present = "target_file")]
    pub targets: Option<String>,

    /// File with one or more targets per line
    #[arg(long)]
    pub target_file: Option<PathBuf>,

    /// Ports to scan. Examples: 80,443 or 1-1024 or 22,80-90
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Discovery connects per second
    #[arg(long)]
    pub rate: Option<u32>,

    /// Discovery and fingerprinting workers
    #[arg(long)]
    pub threads: Option<usize>,

    /// Hosts with more open ports than this get a web liveness probe instead
    #[arg(long)]
    pub max_port: Option<usize>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// SOCKS5 proxy host:port for plugins and the web scanner
    #[arg(long)]
    pub proxy: Option<String>,

    /// Guess each host's operating system
    #[arg(long)]
    pub os: bool,

    /// Look up each host's location (needs data.geo_db)
    #[arg(long)]
    pub addr: bool,

    /// Test credentials on supported services
    #[arg(long)]
    pub crack: bool,

    /// Hand fingerprinted web targets to vulnerability matching
    #[arg(long)]
    pub pocscan: bool,

    #[arg(long)]
    pub crack_threads: Option<usize>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub crack_timeout: Option<u64>,

    /// Pause before each attempt in seconds
    #[arg(long)]
    pub crack_delay: Option<u64>,

    /// Keep testing after the first valid credential
    #[arg(long)]
    pub crack_all: bool,

    /// Protocols to test, comma separated (all = every plugin)
    #[arg(long)]
    pub module: Option<String>,

    #[arg(long)]
    pub user_file: Option<PathBuf>,

    #[arg(long)]
    pub pass_file: Option<PathBuf>,

    /// user:pass per line
    #[arg(long)]
    pub cred_file: Option<PathBuf>,

    #[arg(long)]
    pub web_threads: Option<usize>,

    /// Web request timeout in seconds
    #[arg(long)]
    pub web_timeout: Option<u64>,

    /// Write the full JSON report here
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Terminal output format: text, json
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    pub output_format: String,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_listen: Option<SocketAddr>,
}
