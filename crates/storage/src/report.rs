//! JSON report persistence

use astra_common::{AstraError, AstraResult, Report};
use std::fs;
use std::path::Path;
use tracing::info;

/// Write the report as pretty JSON. The file is written to a sibling temp
/// path first and renamed, so readers never see a partial report.
pub fn write_report(report: &Report, path: &Path) -> AstraResult<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| AstraError::Storage(format!("serialize report: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    info!("Report {} written to {}", report.run_id, path.display());
    Ok(())
}

pub fn read_report(path: &Path) -> AstraResult<Report> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AstraError::Parse(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_common::{CrackResult, IpResult, WebTarget};

    #[test]
    fn report_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");

        let mut report = Report::new();
        report.ip_results.push(IpResult::new("10.0.0.1".parse().unwrap()));
        report.web_targets.push(WebTarget::new("http://10.0.0.1:8080"));
        report.crack_results.push(CrackResult {
            address: "10.0.0.1:6379".parse().unwrap(),
            protocol: "redis".into(),
            username: String::new(),
            password: String::new(),
            unauthenticated: true,
        });
        report.finish();

        write_report(&report, &path).unwrap();
        let back = read_report(&path).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.crack_results, report.crack_results);
        assert_eq!(back.web_targets, report.web_targets);
        assert!(back.finished_at.is_some());
        assert!(!dir.path().join("nested/report.json.tmp").exists());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(read_report(&path), Err(AstraError::Parse(_))));
    }
}
