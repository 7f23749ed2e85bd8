//! Terminal output for a finished run

use anyhow::Result;
use astra_common::Report;
use serde_json::json;
use std::time::Duration;

/// Print the report in the specified format
pub fn print_report(report: &Report, format: &str, scan_duration: Duration) -> Result<()> {
    match format.trim().to_lowercase().as_str() {
        "json" | "j" => print_json(report, scan_duration)?,
        _ => print_table(report, scan_duration),
    }
    Ok(())
}

fn print_table(report: &Report, scan_duration: Duration) {
    println!("\n{:-<96}", "");
    println!("{:<40} {:<24} {:<16} {:<12}", "HOST", "PORTS", "LOCATION", "OS");
    println!("{:-<96}", "");
    for ip in &report.ip_results {
        let location = format!("{} {}", ip.country, ip.area);
        println!(
            "{:<40} {:<24} {:<16} {:<12}",
            ip.ip,
            truncate(&ip.ports, 24),
            truncate(location.trim(), 16),
            ip.os
        );
    }

    if !report.service_records.is_empty() {
        println!("\n{:<46} {:<16} {:<32}", "SERVICE", "PROTOCOL", "VERSION");
        for record in &report.service_records {
            println!(
                "{:<46} {:<16} {:<32}",
                record.address.to_string(),
                record.protocol,
                truncate(record.version.trim(), 32)
            );
        }
    }

    if !report.web_results.is_empty() {
        println!("\n{:<48} {:<6} {:<24} {:<16}", "URL", "STATUS", "TITLE", "FINGERS");
        for result in &report.web_results {
            let status = result.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
            let fingers: Vec<&str> = result.fingers.iter().map(|f| f.name.as_str()).collect();
            println!(
                "{:<48} {:<6} {:<24} {:<16}",
                truncate(&result.url, 48),
                status,
                truncate(&result.title, 24),
                fingers.join(",")
            );
        }
    }

    if !report.crack_results.is_empty() {
        println!("\n{:<46} {:<10} {:<32}", "WEAK CREDENTIAL", "PROTOCOL", "USER:PASS");
        for result in &report.crack_results {
            let credential = if result.unauthenticated {
                "(no authentication)".to_string()
            } else {
                format!("{}:{}", result.username, result.password)
            };
            println!(
                "{:<46} {:<10} {:<32}",
                result.address.to_string(),
                result.protocol,
                credential
            );
        }
    }

    println!("{:-<96}", "");
    println!("\nSummary:");
    println!("  Hosts: {}", report.ip_results.len());
    println!("  Services: {}", report.service_records.len());
    println!("  Web targets: {}", report.web_targets.len());
    println!("  POC targets: {}", report.poc_targets.len());
    println!("  Weak credentials: {}", report.crack_results.len());
    println!("  Undecided attempts: {}", report.crack_errors.len());
    println!("  Duration: {}", format_duration(scan_duration));
    println!();
}

fn print_json(report: &Report, scan_duration: Duration) -> Result<()> {
    let output = json!({
        "scan_info": {
            "run_id": report.run_id,
            "duration_seconds": scan_duration.as_secs_f64(),
            "duration_formatted": format_duration(scan_duration),
        },
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
