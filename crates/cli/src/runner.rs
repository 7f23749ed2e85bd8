// runner.rs
use anyhow::{anyhow, Context, Result};
use astra_common::{AstraError, PocScanner};
use astra_crack::{load_credentials, CrackOptions, PluginRegistry};
use astra_orchestrator::{Pipeline, PipelineConfig};
use astra_scanner_tcp::{PingOsDetector, ServiceProber, TcpScanner};
use astra_storage::{write_report, GeoDatabase};
use astra_target_resolver::TargetResolver;
use astra_webscan::{FingerRules, HttpWebScanner, WebOptions, WebProbe};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::args::ScanArgs;
use crate::config::Settings;
use crate::output::print_report;

/// How long the fingerprinter waits for a service to speak first.
const BANNER_TIMEOUT: Duration = Duration::from_millis(1500);

pub async fn run_scan(args: ScanArgs, settings: Settings) -> Result<()> {
    let mut tokens: Vec<String> = args
        .targets
        .as_deref()
        .map(|t| t.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(path) = &args.target_file {
        tokens.extend(TargetResolver::read_target_file(path).await?);
    }
    let hosts = TargetResolver::resolve_tokens(tokens.iter().map(String::as_str)).await?;
    let ports = parse_ports(&settings.ports)?;

    info!("Hosts: {}", hosts.len());
    info!("Ports: {}", ports.len());
    info!("Rate limit: {}/s, threads: {}", settings.rate, settings.threads);

    // startup data; any failure here ends the run before a packet is sent
    let geo = if settings.addr {
        let path = settings.geo_db.as_deref().ok_or_else(|| {
            AstraError::config_load("geolocation database", "--addr needs data.geo_db")
        })?;
        Some(Arc::new(GeoDatabase::load(path)?))
    } else {
        None
    };
    let rules = match &settings.finger_rules {
        Some(path) => FingerRules::load(path)?,
        None => FingerRules::builtin(),
    };
    let credentials = if settings.crack {
        load_credentials(
            settings.user_file.as_deref(),
            settings.pass_file.as_deref(),
            settings.cred_file.as_deref(),
        )?
    } else {
        Vec::new()
    };

    let proxy = settings.proxy.as_deref();
    let scanner = TcpScanner::new().with_timeout(settings.timeout);
    let fingerprinter = ServiceProber::new(settings.timeout, BANNER_TIMEOUT);
    let prober = WebProbe::new(settings.web_timeout, settings.web_threads, proxy)?;
    let web = HttpWebScanner::new(
        &WebOptions {
            threads: settings.web_threads,
            timeout: settings.web_timeout,
            proxy: settings.proxy.clone(),
        },
        rules,
    )?;

    let config = PipelineConfig {
        ports,
        threads: settings.threads,
        rate: settings.rate,
        max_port: settings.max_port,
        crack: settings.crack,
        modules: settings.modules.clone(),
        crack_options: CrackOptions {
            threads: settings.crack_threads,
            timeout: settings.crack_timeout,
            delay: settings.crack_delay,
            crack_all: settings.crack_all,
            proxy: settings.proxy.clone(),
        },
    };

    let mut pipeline = Pipeline::new(
        config,
        Arc::new(scanner),
        Arc::new(fingerprinter),
        Arc::new(prober),
        Arc::new(PluginRegistry::with_defaults()),
    )
    .with_web_scanner(Arc::new(web))
    .with_credentials(credentials);
    if let Some(geo) = geo {
        pipeline = pipeline.with_geo(geo);
    }
    if settings.os {
        pipeline = pipeline.with_os_detector(Arc::new(PingOsDetector::default()));
    }
    if settings.pocscan {
        pipeline = pipeline.with_poc_scanner(Arc::new(PocTargetLog));
    }

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work");
            stop.stop();
        }
    });

    let scan_start = Instant::now();
    let report = pipeline.run(hosts).await?;
    let scan_duration = scan_start.elapsed();

    if let Some(path) = &args.output {
        write_report(&report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    print_report(&report, &args.output_format, scan_duration)?;
    Ok(())
}

/// Vulnerability matching runs outside astra; its inputs are handed off on
/// the log stream.
struct PocTargetLog;

#[async_trait]
impl PocScanner for PocTargetLog {
    async fn run(&self, inputs: &[String]) -> Result<()> {
        for input in inputs {
            info!(poc_target = %input, "poc target");
        }
        Ok(())
    }
}

/// Parses a port string like "80,443,1000-1010" into a vector of u16 ports
fn parse_ports(ports_str: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in ports_str.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start
                .trim()
                .parse()
                .with_context(|| format!("Invalid start port: {start}"))?;
            let end: u16 = end
                .trim()
                .parse()
                .with_context(|| format!("Invalid end port: {end}"))?;
            if start > end {
                return Err(anyhow!("Invalid range {part}: start > end"));
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse().with_context(|| format!("Invalid port: {part}"))?;
            ports.push(port);
        }
    }

    ports.sort_unstable();
    ports.dedup();
    if ports.is_empty() {
        Err(anyhow!("No ports specified"))
    } else {
        Ok(ports)
    }
}
