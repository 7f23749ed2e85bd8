//! Finding classification and the per-host port-cap gate

use astra_common::{CrackJob, LivenessProber, PortFinding, ServiceRecord, WebTarget};
use astra_crack::{PluginRegistry, StopHandle};
use metrics::counter;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info};

/// Where one finding goes. Exactly one variant per finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Web(WebTarget),
    /// A non-web service, tagged with a crack job when a plugin exists.
    Service(ServiceRecord, Option<CrackJob>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub web_targets: Vec<WebTarget>,
    pub service_records: Vec<ServiceRecord>,
    pub crack_jobs: Vec<CrackJob>,
}

/// Route a single finding. Pure and total.
pub fn route(finding: &PortFinding, registry: &PluginRegistry) -> Route {
    let host = finding.url_host();
    let port = finding.port();

    match finding.service_name.as_str() {
        "ssl" if port == 443 => Route::Web(WebTarget::new(format!("https://{host}"))),
        "ssl" => Route::Web(WebTarget::new(format!("https://{host}:{port}"))),
        "http" if port == 80 => Route::Web(WebTarget::new(format!("http://{host}"))),
        "http" => Route::Web(WebTarget::new(format!("http://{host}:{port}"))),
        "unknown" => Route::Web(WebTarget::new(format!("{host}:{port}"))),
        service => {
            let record = ServiceRecord {
                address: finding.address,
                protocol: service.to_string(),
                version: format!("{} {}", finding.vendor_product, finding.version),
            };
            let job = registry
                .resolve(service)
                .map(|protocol| CrackJob::new(finding.address, protocol));
            Route::Service(record, job)
        }
    }
}

/// Split findings into web targets, service records and crack jobs, keeping
/// input order within each list.
pub fn classify(findings: &[PortFinding], registry: &PluginRegistry) -> Classification {
    let mut out = Classification::default();
    for finding in findings {
        match route(finding, registry) {
            Route::Web(target) => {
                counter!("astra_findings_total", "route" => "web").increment(1);
                out.web_targets.push(target);
            }
            Route::Service(record, job) => {
                counter!("astra_findings_total", "route" => "service").increment(1);
                out.service_records.push(record);
                if let Some(job) = job {
                    counter!("astra_findings_total", "route" => "crack").increment(1);
                    out.crack_jobs.push(job);
                }
            }
        }
    }
    debug!(
        web = out.web_targets.len(),
        services = out.service_records.len(),
        crack = out.crack_jobs.len(),
        "Classified {} findings",
        findings.len()
    );
    out
}

/// Replace the port set of every host with more than `max_port` open ports by
/// the liveness probe's answer. Hosts at or under the cap pass unchanged.
/// Once `stop` is set, capped hosts are not probed and keep an empty set.
pub async fn apply_port_cap(
    open: BTreeMap<IpAddr, Vec<u16>>,
    max_port: usize,
    prober: &dyn LivenessProber,
    stop: &StopHandle,
) -> BTreeMap<IpAddr, Vec<u16>> {
    let mut gated = BTreeMap::new();
    for (host, ports) in open {
        if ports.len() > max_port {
            counter!("astra_hosts_capped_total").increment(1);
            let live = if stop.is_stopped() {
                debug!(%host, "stopped, skipping web liveness probe");
                Vec::new()
            } else {
                info!(
                    "{} has {} open ports (> {}), probing web liveness instead",
                    host,
                    ports.len(),
                    max_port
                );
                prober.live_ports(host).await
            };
            gated.insert(host, live);
        } else {
            gated.insert(host, ports);
        }
    }
    gated
}
