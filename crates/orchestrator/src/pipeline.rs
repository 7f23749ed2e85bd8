//! End-to-end assessment pipeline
//!
//! discovery -> port-cap gate -> host records -> fingerprinting ->
//! classification -> web scan / poc hand-off -> credential testing -> report.
//!
//! Every concurrent stage runs on its own fixed-width pool and hands results
//! back over a channel; [`Pipeline::run`] is the only writer of the [`Report`].

use anyhow::Result;
use astra_common::{
    AstraError, CrackJob, Credential, Fingerprinter, GeoLocator, IpResult, LivenessProber,
    OsDetector, PocScanner, PortFinding, Report, Scanner, Target, WebResult, WebScanner,
};
use astra_crack::{filter_modules, CrackEngine, CrackOptions, PluginRegistry, StopHandle};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::classifier::{apply_port_cap, classify};
use crate::pool::run_pool;
use crate::progress::ProgressTracker;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ports probed on every host during discovery.
    pub ports: Vec<u16>,
    /// Width of the discovery, host-record and fingerprinting pools.
    pub threads: usize,
    /// Discovery connects per second.
    pub rate: u32,
    /// Hosts with more open ports than this fall back to the liveness probe.
    pub max_port: usize,
    pub crack: bool,
    /// Protocols to restrict cracking to. Empty or `all` means no filter.
    pub modules: Vec<String>,
    pub crack_options: CrackOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            threads: 25,
            rate: 1500,
            max_port: 200,
            crack: false,
            modules: Vec::new(),
            crack_options: CrackOptions::default(),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    scanner: Arc<dyn Scanner>,
    fingerprinter: Arc<dyn Fingerprinter>,
    prober: Arc<dyn LivenessProber>,
    registry: Arc<PluginRegistry>,
    web: Option<Arc<dyn WebScanner>>,
    poc: Option<Arc<dyn PocScanner>>,
    geo: Option<Arc<dyn GeoLocator>>,
    os: Option<Arc<dyn OsDetector>>,
    credentials: Vec<Credential>,
    stop: StopHandle,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        scanner: Arc<dyn Scanner>,
        fingerprinter: Arc<dyn Fingerprinter>,
        prober: Arc<dyn LivenessProber>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            config,
            scanner,
            fingerprinter,
            prober,
            registry,
            web: None,
            poc: None,
            geo: None,
            os: None,
            credentials: Vec::new(),
            stop: StopHandle::default(),
        }
    }

    #[must_use]
    pub fn with_web_scanner(mut self, web: Arc<dyn WebScanner>) -> Self {
        self.web = Some(web);
        self
    }

    #[must_use]
    pub fn with_poc_scanner(mut self, poc: Arc<dyn PocScanner>) -> Self {
        self.poc = Some(poc);
        self
    }

    #[must_use]
    pub fn with_geo(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = Some(geo);
        self
    }

    #[must_use]
    pub fn with_os_detector(mut self, os: Arc<dyn OsDetector>) -> Self {
        self.os = Some(os);
        self
    }

    /// Candidate credentials, tried verbatim. Empty means plugin defaults.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Vec<Credential>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Stops every stage from taking new work; in-flight items finish and
    /// the run still returns a report of what completed.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[instrument(skip_all, fields(hosts = hosts.len(), ports = self.config.ports.len()))]
    pub async fn run(&self, hosts: Vec<IpAddr>) -> Result<Report> {
        let mut report = Report::new();
        info!("Run {} started", report.run_id);

        let open = self.discover(&hosts).await?;
        info!("{} hosts with open ports", open.len());
        let open =
            apply_port_cap(open, self.config.max_port, self.prober.as_ref(), &self.stop).await;

        report.ip_results = self.describe_hosts(hosts, &open).await?;

        let findings = self.fingerprint(&open).await?;
        let classified = classify(&findings, &self.registry);
        info!(
            "{} web targets, {} services, {} crack jobs",
            classified.web_targets.len(),
            classified.service_records.len(),
            classified.crack_jobs.len()
        );
        report.web_targets = classified.web_targets;
        report.service_records = classified.service_records;

        if let Some(web) = &self.web {
            if !report.web_targets.is_empty() && !self.stop.is_stopped() {
                report.web_results = web.scan(&report.web_targets).await;
                report.poc_targets = report
                    .web_results
                    .iter()
                    .filter_map(WebResult::poc_input)
                    .collect();
            }
        }

        if let Some(poc) = &self.poc {
            if !report.poc_targets.is_empty() {
                if let Err(e) = poc.run(&report.poc_targets).await {
                    warn!(stage = "poc", error = %e, "Vulnerability matching failed");
                }
            }
        }

        if self.config.crack {
            self.crack(classified.crack_jobs, &mut report).await;
        }

        report.finish();
        info!("Run {} finished", report.run_id);
        Ok(report)
    }

    /// Open ports per host, each list sorted.
    async fn discover(&self, hosts: &[IpAddr]) -> Result<BTreeMap<IpAddr, Vec<u16>>> {
        let targets: Vec<Target> = hosts
            .iter()
            .flat_map(|&ip| self.config.ports.iter().map(move |&port| Target::new(ip, port)))
            .collect();
        info!("Discovery over {} targets with {}", targets.len(), self.scanner.name());

        let scanner = self.scanner.clone();
        let limiter = Arc::new(RateLimiter::new(self.config.rate));
        let progress = Arc::new(ProgressTracker::new("discovery"));
        let open = run_pool(
            progress,
            targets,
            self.config.threads,
            &self.stop,
            move |target: Target| {
                let scanner = scanner.clone();
                let limiter = limiter.clone();
                async move {
                    limiter.acquire().await;
                    let probe = scanner
                        .scan(&target)
                        .await
                        .map_err(|e| AstraError::partial("discovery", target, e))?;
                    Ok(probe.is_open().then_some(target))
                }
            },
        )
        .await?;

        let mut grouped: BTreeMap<IpAddr, BTreeSet<u16>> = BTreeMap::new();
        for target in open {
            grouped.entry(target.ip).or_default().insert(target.port);
        }
        Ok(grouped
            .into_iter()
            .map(|(ip, ports)| (ip, ports.into_iter().collect()))
            .collect())
    }

    /// One record per input host; hosts without open ports keep an empty
    /// port list.
    async fn describe_hosts(
        &self,
        hosts: Vec<IpAddr>,
        open: &BTreeMap<IpAddr, Vec<u16>>,
    ) -> Result<Vec<IpResult>> {
        let items: Vec<(IpAddr, Vec<u16>)> = hosts
            .into_iter()
            .map(|ip| (ip, open.get(&ip).cloned().unwrap_or_default()))
            .collect();
        let geo = self.geo.clone();
        let os = self.os.clone();
        let progress = Arc::new(ProgressTracker::new("host"));

        let mut records = run_pool(
            progress,
            items,
            self.config.threads,
            &self.stop,
            move |(ip, ports): (IpAddr, Vec<u16>)| {
                let geo = geo.clone();
                let os = os.clone();
                async move {
                    let mut record = IpResult::new(ip);
                    record.ports = ports.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
                    if let Some(location) = geo.as_ref().and_then(|g| g.locate(ip)) {
                        record.country = location.country;
                        record.area = location.area;
                    }
                    if let Some(os) = os {
                        match os.detect(ip).await {
                            Ok(guess) => record.os = guess,
                            Err(e) => warn!(
                                stage = "os",
                                target = %ip,
                                error = %e,
                                "OS detection failed"
                            ),
                        }
                    }
                    Ok(Some((ip, record)))
                }
            },
        )
        .await?;

        records.sort_by_key(|(ip, _)| *ip);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Findings sorted by address. Addresses are unique because each host's
    /// port list is.
    async fn fingerprint(&self, open: &BTreeMap<IpAddr, Vec<u16>>) -> Result<Vec<PortFinding>> {
        let addrs: Vec<SocketAddr> = open
            .iter()
            .flat_map(|(ip, ports)| ports.iter().map(move |&port| SocketAddr::new(*ip, port)))
            .collect();
        info!("Fingerprinting {} open ports", addrs.len());

        let fingerprinter = self.fingerprinter.clone();
        let progress = Arc::new(ProgressTracker::new("fingerprint"));
        let mut findings = run_pool(
            progress,
            addrs,
            self.config.threads,
            &self.stop,
            move |addr: SocketAddr| {
                let fingerprinter = fingerprinter.clone();
                async move {
                    let finding = fingerprinter
                        .fingerprint(addr)
                        .await
                        .map_err(|e| AstraError::partial("fingerprint", addr, e))?;
                    Ok(Some(finding))
                }
            },
        )
        .await?;

        findings.sort_by_key(|f| f.address);
        Ok(findings)
    }

    async fn crack(&self, jobs: Vec<CrackJob>, report: &mut Report) {
        let jobs = filter_modules(jobs, &self.config.modules, &self.registry);
        if jobs.is_empty() || self.stop.is_stopped() {
            return;
        }
        let engine = CrackEngine::new(self.registry.clone(), self.config.crack_options.clone())
            .with_stop_handle(self.stop.clone());
        let cracked = engine.run(jobs, &self.credentials).await;
        info!(
            "{} weak credentials, {} undecided attempts",
            cracked.results.len(),
            cracked.errors.len()
        );
        report.crack_results = cracked.results;
        report.crack_errors = cracked.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_common::{CrackOutcome, Finger, GeoLocation, PortState, ProbeResult, WebTarget};
    use astra_crack::{Attempt, CrackPlugin, Endpoint};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    struct FakeScanner {
        open: HashSet<SocketAddr>,
    }

    #[async_trait]
    impl Scanner for FakeScanner {
        async fn scan(&self, target: &Target) -> anyhow::Result<ProbeResult> {
            let state = if self.open.contains(&target.socket_addr()) {
                PortState::Open
            } else {
                PortState::Closed
            };
            Ok(ProbeResult::new(*target, state))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Known addresses map to a service name, anything else fails.
    struct FakeFingerprinter {
        services: HashMap<SocketAddr, &'static str>,
    }

    #[async_trait]
    impl Fingerprinter for FakeFingerprinter {
        async fn fingerprint(&self, addr: SocketAddr) -> anyhow::Result<PortFinding> {
            match self.services.get(&addr) {
                Some(service) => Ok(PortFinding::new(addr, *service)),
                None => anyhow::bail!("connection reset"),
            }
        }
    }

    struct FakeProber(Vec<u16>);

    #[async_trait]
    impl LivenessProber for FakeProber {
        async fn live_ports(&self, _host: IpAddr) -> Vec<u16> {
            self.0.clone()
        }
    }

    /// Tags every `:8080` target as tomcat.
    struct FakeWeb;

    #[async_trait]
    impl WebScanner for FakeWeb {
        async fn scan(&self, targets: &[WebTarget]) -> Vec<WebResult> {
            targets
                .iter()
                .map(|t| WebResult {
                    url: t.to_string(),
                    status: Some(200),
                    fingers: if t.as_str().ends_with(":8080") {
                        vec![Finger {
                            name: "Tomcat".into(),
                            poc_tags: vec!["tomcat".into()],
                        }]
                    } else {
                        Vec::new()
                    },
                    ..Default::default()
                })
                .collect()
        }
    }

    #[derive(Default)]
    struct RecordingPoc(Mutex<Vec<String>>);

    #[async_trait]
    impl PocScanner for RecordingPoc {
        async fn run(&self, inputs: &[String]) -> anyhow::Result<()> {
            self.0.lock().unwrap().extend_from_slice(inputs);
            Ok(())
        }
    }

    struct Lab;

    impl GeoLocator for Lab {
        fn locate(&self, _ip: IpAddr) -> Option<GeoLocation> {
            Some(GeoLocation {
                country: "Private".into(),
                area: "Lab".into(),
            })
        }
    }

    struct AlwaysLinux;

    #[async_trait]
    impl OsDetector for AlwaysLinux {
        async fn detect(&self, _ip: IpAddr) -> anyhow::Result<String> {
            Ok("linux".into())
        }
    }

    /// Redis stand-in that is always open without auth.
    struct OpenRedis;

    #[async_trait]
    impl CrackPlugin for OpenRedis {
        fn name(&self) -> &'static str {
            "redis"
        }

        fn default_usernames(&self) -> &'static [&'static str] {
            &["default"]
        }

        async fn check_unauth(&self, _endpoint: &Endpoint<'_>) -> Option<CrackOutcome> {
            Some(CrackOutcome::Success)
        }

        async fn probe(&self, _attempt: &Attempt<'_>) -> CrackOutcome {
            CrackOutcome::Fail
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    /// 10.0.0.1 has four open ports, one of which cannot be fingerprinted.
    /// 10.0.0.2 has six open ports against a cap of five and answers the
    /// liveness probe on 8080 only. 10.0.0.3 has nothing open.
    fn pipeline(config: PipelineConfig) -> Pipeline {
        let mut open: HashSet<SocketAddr> = [
            "10.0.0.1:22",
            "10.0.0.1:80",
            "10.0.0.1:6379",
            "10.0.0.1:9999",
        ]
        .into_iter()
        .map(addr)
        .collect();
        for port in 1..=6 {
            open.insert(SocketAddr::new("10.0.0.2".parse().unwrap(), port));
        }
        let services = HashMap::from([
            (addr("10.0.0.1:22"), "ssh"),
            (addr("10.0.0.1:80"), "http"),
            (addr("10.0.0.1:6379"), "redis"),
            (addr("10.0.0.2:8080"), "http"),
        ]);
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(OpenRedis));

        Pipeline::new(
            config,
            Arc::new(FakeScanner { open }),
            Arc::new(FakeFingerprinter { services }),
            Arc::new(FakeProber(vec![8080])),
            Arc::new(registry),
        )
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            ports: vec![1, 2, 3, 4, 5, 6, 22, 80, 6379, 9999],
            threads: 4,
            rate: 100_000,
            max_port: 5,
            crack: true,
            ..Default::default()
        }
    }

    fn hosts() -> Vec<IpAddr> {
        vec![
            "10.0.0.2".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
        ]
    }

    #[tokio::test]
    async fn full_run() {
        let poc = Arc::new(RecordingPoc::default());
        let report = pipeline(config())
            .with_web_scanner(Arc::new(FakeWeb))
            .with_poc_scanner(poc.clone())
            .with_geo(Arc::new(Lab))
            .with_os_detector(Arc::new(AlwaysLinux))
            .run(hosts())
            .await
            .unwrap();

        let ips: Vec<(&str, &str)> = report
            .ip_results
            .iter()
            .map(|r| (r.ip.as_str(), r.ports.as_str()))
            .collect();
        assert_eq!(
            ips,
            vec![("10.0.0.1", "22,80,6379,9999"), ("10.0.0.2", "8080"), ("10.0.0.3", "")]
        );
        assert!(report.ip_results.iter().all(|r| r.os == "linux" && r.area == "Lab"));

        let web: Vec<&str> = report.web_targets.iter().map(WebTarget::as_str).collect();
        assert_eq!(web, vec!["http://10.0.0.1", "http://10.0.0.2:8080"]);

        let services: Vec<&str> = report
            .service_records
            .iter()
            .map(|r| r.protocol.as_str())
            .collect();
        assert_eq!(services, vec!["ssh", "redis"]);

        assert_eq!(report.web_results.len(), 2);
        assert_eq!(report.poc_targets, vec!["http://10.0.0.2:8080|tomcat"]);
        assert_eq!(*poc.0.lock().unwrap(), report.poc_targets);

        assert_eq!(report.crack_results.len(), 1);
        assert_eq!(report.crack_results[0].address, addr("10.0.0.1:6379"));
        assert!(report.crack_results[0].unauthenticated);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn cracking_is_opt_in() {
        let report = pipeline(PipelineConfig {
            crack: false,
            ..config()
        })
        .run(hosts())
        .await
        .unwrap();
        assert_eq!(report.service_records.len(), 2);
        assert!(report.crack_results.is_empty());
        // no web scanner configured
        assert!(report.web_results.is_empty());
        assert!(report.poc_targets.is_empty());
    }

    #[tokio::test]
    async fn module_filter_excludes_jobs() {
        let report = pipeline(PipelineConfig {
            modules: vec!["mongodb".into()],
            ..config()
        })
        .run(hosts())
        .await
        .unwrap();
        assert!(report.crack_results.is_empty());
    }

    #[tokio::test]
    async fn stopped_pipeline_reports_nothing_but_finishes() {
        let pipeline = pipeline(config());
        pipeline.stop_handle().stop();
        let report = pipeline.run(hosts()).await.unwrap();
        assert!(report.ip_results.is_empty());
        assert!(report.web_targets.is_empty());
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn no_hosts() {
        let report = pipeline(config()).run(Vec::new()).await.unwrap();
        assert!(report.ip_results.is_empty());
        assert!(report.service_records.is_empty());
    }
}
