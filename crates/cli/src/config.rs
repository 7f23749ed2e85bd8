//! TOML config file and its merge with command-line flags

use astra_common::{AstraError, AstraResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::args::ScanArgs;

/// Common service ports. Full-range connect scans are rarely what you want.
pub const DEFAULT_PORTS: &str = "21,22,23,25,53,80,81,88,110,111,135,139,143,389,443,445,465,587,\
    873,993,995,1080,1433,1521,2049,2181,2375,3306,3389,5000,5432,5672,5900,5984,6379,7001,8000,\
    8080,8081,8088,8443,8888,9000,9090,9200,11211,27017";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub scan: ScanSection,
    pub crack: CrackSection,
    pub web: WebSection,
    pub data: DataSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSection {
    pub ports: Option<String>,
    pub rate: Option<u32>,
    pub threads: Option<usize>,
    pub max_port: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub proxy: Option<String>,
    pub os: Option<bool>,
    pub addr: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrackSection {
    pub enabled: Option<bool>,
    pub threads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub delay_secs: Option<u64>,
    pub crack_all: Option<bool>,
    pub modules: Option<Vec<String>>,
    pub user_file: Option<PathBuf>,
    pub pass_file: Option<PathBuf>,
    pub cred_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSection {
    pub threads: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub pocscan: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSection {
    pub geo_db: Option<PathBuf>,
    pub finger_rules: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    pub log_json: Option<bool>,
    pub metrics_listen: Option<SocketAddr>,
}

impl ConfigFile {
    /// Load a config file. Unreadable or malformed files are fatal.
    pub fn load(path: &Path) -> AstraResult<Self> {
        let what = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| AstraError::config_load(&what, e))?;
        toml::from_str(&content).map_err(|e| AstraError::config_load(&what, e))
    }
}

/// Effective run settings: flags win over the file, the file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ports: String,
    pub rate: u32,
    pub threads: usize,
    pub max_port: usize,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub os: bool,
    pub addr: bool,
    pub crack: bool,
    pub crack_threads: usize,
    pub crack_timeout: Duration,
    pub crack_delay: Duration,
    pub crack_all: bool,
    pub modules: Vec<String>,
    pub user_file: Option<PathBuf>,
    pub pass_file: Option<PathBuf>,
    pub cred_file: Option<PathBuf>,
    pub pocscan: bool,
    pub web_threads: usize,
    pub web_timeout: Duration,
    pub geo_db: Option<PathBuf>,
    pub finger_rules: Option<PathBuf>,
    pub log_json: bool,
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn resolve(args: &ScanArgs, file: ConfigFile) -> Self {
        let ConfigFile {
            scan,
            crack,
            web,
            data,
            telemetry,
        } = file;

        let modules = match &args.module {
            Some(list) => split_list(list),
            None => crack.modules.unwrap_or_default(),
        };

        Self {
            ports: args.ports.clone().or(scan.ports).unwrap_or_else(|| DEFAULT_PORTS.to_string()),
            rate: args.rate.or(scan.rate).unwrap_or(1500),
            threads: args.threads.or(scan.threads).unwrap_or(25),
            max_port: args.max_port.or(scan.max_port).unwrap_or(200),
            timeout: Duration::from_millis(args.timeout.or(scan.timeout_ms).unwrap_or(1000)),
            proxy: args.proxy.clone().or(scan.proxy),
            os: args.os || scan.os.unwrap_or(false),
            addr: args.addr || scan.addr.unwrap_or(false),
            crack: args.crack || crack.enabled.unwrap_or(false),
            crack_threads: args.crack_threads.or(crack.threads).unwrap_or(10),
            crack_timeout: Duration::from_secs(
                args.crack_timeout.or(crack.timeout_secs).unwrap_or(5),
            ),
            crack_delay: Duration::from_secs(args.crack_delay.or(crack.delay_secs).unwrap_or(0)),
            crack_all: args.crack_all || crack.crack_all.unwrap_or(false),
            modules,
            user_file: args.user_file.clone().or(crack.user_file),
            pass_file: args.pass_file.clone().or(crack.pass_file),
            cred_file: args.cred_file.clone().or(crack.cred_file),
            pocscan: args.pocscan || web.pocscan.unwrap_or(false),
            web_threads: args.web_threads.or(web.threads).unwrap_or(25),
            web_timeout: Duration::from_secs(args.web_timeout.or(web.timeout_secs).unwrap_or(5)),
            geo_db: data.geo_db,
            finger_rules: data.finger_rules,
            log_json: args.log_json || telemetry.log_json.unwrap_or(false),
            metrics_listen: args.metrics_listen.or(telemetry.metrics_listen),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
