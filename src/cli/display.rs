//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use chrono::{DateTime, Utc};

use super::commands::ContextInfo;
use crate::cluster::{ClusterSummary, NodeSummary, PodSummary};
use crate::deployment::{DeploymentMetrics, DeploymentRecord, DeploymentStats};
use crate::source::{Branch, RepositoryInfo};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

/// Compact age like kubectl: `42s`, `7m`, `3h`, `12d`
pub fn format_age(seconds: i64) -> String {
    match seconds.max(0) {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

fn format_bytes(bytes: u64) -> String {
    const MI: u64 = 1024 * 1024;
    if bytes >= 1024 * MI {
        format!("{:.1}Gi", bytes as f64 / (1024 * MI) as f64)
    } else {
        format!("{}Mi", bytes / MI)
    }
}

// ============================================================================
// Context display
// ============================================================================

/// Format context list for display
pub fn format_context_list(contexts: &[ContextInfo]) -> String {
    let headers = &["", "NAME", "URL"];
    let rows: Vec<Vec<String>> = contexts
        .iter()
        .map(|ctx| {
            vec![
                if ctx.is_current { "*" } else { " " }.to_string(),
                ctx.name.clone(),
                ctx.url.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

pub fn format_current_context(name: &str, url: &str) -> String {
    format!("Current context: {} ({})\n", name, url)
}

// ============================================================================
// Deployment display
// ============================================================================

/// Format deployment list for display
pub fn format_deployment_list(deployments: &[DeploymentRecord], now: DateTime<Utc>) -> String {
    let headers = &["ID", "NAME", "NAMESPACE", "STATUS", "REPLICAS", "READY", "AGE"];
    let rows: Vec<Vec<String>> = deployments
        .iter()
        .map(|d| {
            vec![
                d.id.to_string(),
                d.name.clone(),
                d.namespace.clone(),
                d.status.to_string(),
                d.configuration.replicas.to_string(),
                format!("{}/{}", d.metrics.ready_pods, d.metrics.desired_pods),
                format_age((now - d.created_at).num_seconds()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format a single deployment for detailed display
pub fn format_deployment_detail(d: &DeploymentRecord) -> String {
    let mut output = String::new();
    let cfg = &d.configuration;

    output.push_str(&format!("ID:           {}\n", d.id));
    output.push_str(&format!("Name:         {}\n", d.name));
    output.push_str(&format!("Namespace:    {}\n", d.namespace));
    output.push_str(&format!("Status:       {}\n", d.status));
    if let Some(err) = &d.last_error {
        output.push_str(&format!("Last Error:   {}\n", err));
    }
    output.push_str(&format!("User:         {}\n", d.user_id));
    output.push_str(&format!("Node:         {}\n", d.node_id));
    output.push_str(&format!("Context Path: {}\n", d.context_path));
    output.push_str(&format!("Created:      {}\n", d.created_at.to_rfc3339()));
    if let Some(ts) = d.deployed_at {
        output.push_str(&format!("Deployed:     {}\n", ts.to_rfc3339()));
    }

    output.push_str("\nSource:\n");
    output.push_str(&format!("  Repository: {}\n", d.source.full_name));
    output.push_str(&format!("  Branch:     {}\n", d.source.branch));

    output.push_str("\nConfiguration:\n");
    output.push_str(&format!("  Replicas:   {}\n", cfg.replicas));
    output.push_str(&format!(
        "  Ports:      {} -> {}\n",
        cfg.service_port, cfg.container_port
    ));
    output.push_str(&format!(
        "  CPU:        {} / {}\n",
        cfg.cpu_request, cfg.cpu_limit
    ));
    output.push_str(&format!(
        "  Memory:     {} / {}\n",
        cfg.memory_request, cfg.memory_limit
    ));
    output.push_str(&format!(
        "  Image:      {}:{}\n",
        cfg.build.image_name, cfg.build.image_tag
    ));
    if !cfg.environment_vars.is_empty() {
        output.push_str("  Env:\n");
        for (k, v) in &cfg.environment_vars {
            output.push_str(&format!("    {}={}\n", k, v));
        }
    }

    let info = &d.cluster_info;
    if !info.workload_name.is_empty() {
        output.push_str("\nCluster:\n");
        output.push_str(&format!("  Workload:   {}\n", info.workload_name));
        output.push_str(&format!("  Service:    {}\n", info.service_name));
        output.push_str(&format!("  External:   {}\n", info.external_url));
        output.push_str(&format!("  Internal:   {}\n", info.internal_url));
    }

    output.push_str("\nMetrics:\n");
    output.push_str(&format_metrics(&d.metrics));

    output
}

/// Format observed metrics, one field per line
pub fn format_metrics(m: &DeploymentMetrics) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "  Pods:       {} ready / {} active / {} desired\n",
        m.ready_pods, m.active_pods, m.desired_pods
    ));
    output.push_str(&format!("  Restarts:   {}\n", m.restart_count));
    output.push_str(&format!("  CPU:        {}m\n", m.cpu_usage));
    output.push_str(&format!("  Memory:     {}\n", format_bytes(m.memory_usage)));
    output.push_str(&format!("  Uptime:     {}\n", format_age(m.uptime_seconds)));

    output
}

/// Format per-status counts
pub fn format_stats(stats: &DeploymentStats) -> String {
    let headers = &["STATUS", "COUNT"];
    let mut rows: Vec<Vec<String>> = stats
        .by_status
        .iter()
        .map(|(status, count)| vec![status.clone(), count.to_string()])
        .collect();
    rows.push(vec!["total".to_string(), stats.total.to_string()]);
    format_table(headers, rows)
}

// ============================================================================
// Cluster display
// ============================================================================

pub fn format_pod_list(pods: &[PodSummary]) -> String {
    let headers = &["NAME", "READY", "STATUS", "RESTARTS", "NODE", "AGE"];
    let rows: Vec<Vec<String>> = pods
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.ready.clone(),
                p.phase.clone(),
                p.restart_count.to_string(),
                p.node.clone(),
                format_age(p.age_seconds),
            ]
        })
        .collect();
    format_table(headers, rows)
}

pub fn format_node_list(nodes: &[NodeSummary]) -> String {
    let headers = &["NAME", "STATUS", "VERSION", "CPU", "MEMORY"];
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|n| {
            vec![
                n.name.clone(),
                if n.ready { "Ready" } else { "NotReady" }.to_string(),
                n.kubelet_version.clone(),
                format!("{}m", n.cpu_capacity_millicores),
                format_bytes(n.memory_capacity_bytes),
            ]
        })
        .collect();
    format_table(headers, rows)
}

pub fn format_namespace_list(namespaces: &[String]) -> String {
    let rows = namespaces.iter().map(|ns| vec![ns.clone()]).collect();
    format_table(&["NAME"], rows)
}

// ============================================================================
// Source display
// ============================================================================

pub fn format_repository(repo: &RepositoryInfo) -> String {
    let mut output = String::new();
    output.push_str(&format!("Repository:     {}\n", repo.full_name));
    output.push_str(&format!("Default Branch: {}\n", repo.default_branch));
    output.push_str(&format!(
        "Visibility:     {}\n",
        if repo.private { "private" } else { "public" }
    ));
    if let Some(ref language) = repo.language {
        output.push_str(&format!("Language:       {}\n", language));
    }
    output.push_str(&format!("Clone URL:      {}\n", repo.clone_url));
    if let Some(ref description) = repo.description {
        output.push_str(&format!("Description:    {}\n", description));
    }
    output
}

/// Branch table with the commit shortened to seven characters
pub fn format_branch_list(branches: &[Branch]) -> String {
    let headers = &["NAME", "COMMIT", "PROTECTED"];
    let rows: Vec<Vec<String>> = branches
        .iter()
        .map(|b| {
            vec![
                b.name.clone(),
                b.commit_sha.chars().take(7).collect(),
                if b.protected { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    format_table(headers, rows)
}

/// Format cluster status for display
pub fn format_cluster_status(status: &ClusterSummary) -> String {
    let mut output = String::new();
    output.push_str("Cluster Status\n");
    output.push_str("==============\n\n");
    output.push_str(&format!("Version:    {}\n", status.version));
    output.push_str(&format!("Platform:   {}\n", status.platform));
    output.push_str(&format!("Nodes:      {}\n", status.nodes_count));
    output.push_str(&format!("Namespaces: {}\n", status.namespaces_count));
    output.push_str(&format!(
        "Pods:       {} ({} running, {} pending, {} failed)\n",
        status.pods_count, status.pods_running, status.pods_pending, status.pods_failed
    ));
    output.push_str(&format!(
        "Capacity:   {}m CPU, {}\n",
        status.total_cpu_millicores,
        format_bytes(status.total_memory_bytes)
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::testing::sample_record;
    use crate::deployment::DeploymentStatus;
    use chrono::Duration;

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "AGE"];
        let rows = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "25".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.contains("NAME"));
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
    }

    #[test]
    fn test_format_table_empty() {
        let output = format_table(&["NAME"], vec![]);
        assert!(output.contains("No resources found"));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(-5), "0s");
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(600), "10m");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(3 * 86_400), "3d");
    }

    #[test]
    fn test_format_context_list() {
        let contexts = vec![
            ContextInfo {
                name: "local".to_string(),
                url: "http://127.0.0.1:8080".to_string(),
                is_current: true,
            },
            ContextInfo {
                name: "remote".to_string(),
                url: "http://10.0.0.1:8080".to_string(),
                is_current: false,
            },
        ];

        let output = format_context_list(&contexts);
        assert!(output.contains("local"));
        assert!(output.contains("remote"));
        assert!(output.contains("*"));
    }

    #[test]
    fn test_format_deployment_list() {
        let mut record = sample_record("My Web App");
        record.status = DeploymentStatus::Running;
        record.metrics.ready_pods = 1;
        let now = record.created_at + Duration::minutes(5);

        let output = format_deployment_list(&[record], now);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("My Web App"));
        assert!(lines[1].contains("running"));
        assert!(lines[1].contains("1/2"));
        assert!(lines[1].contains("5m"));
    }

    #[test]
    fn test_format_deployment_detail() {
        let mut record = sample_record("web");
        record.last_error = Some("create service: quota exceeded".into());

        let output = format_deployment_detail(&record);
        assert!(output.contains("Repository: acme/web"));
        assert!(output.contains("Last Error:   create service: quota exceeded"));
        // no cluster section before provisioning
        assert!(!output.contains("Workload:"));
    }

    #[test]
    fn test_format_stats() {
        let mut stats = DeploymentStats::zeroed();
        stats.record(DeploymentStatus::Running);
        stats.record(DeploymentStatus::Running);
        stats.record(DeploymentStatus::Failed);

        let output = format_stats(&stats);
        assert!(output.contains("running"));
        assert!(output
            .lines()
            .any(|l| l.split_whitespace().collect::<Vec<_>>() == ["total", "3"]));
    }

    #[test]
    fn test_format_branch_list() {
        let branches = vec![
            Branch {
                name: "main".into(),
                commit_sha: "0123456789abcdef".into(),
                protected: true,
            },
            Branch {
                name: "dev".into(),
                commit_sha: "abc".into(),
                protected: false,
            },
        ];

        let output = format_branch_list(&branches);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].contains("COMMIT"));
        assert_eq!(lines[1].split_whitespace().collect::<Vec<_>>(), ["main", "0123456", "yes"]);
        assert_eq!(lines[2].split_whitespace().collect::<Vec<_>>(), ["dev", "abc", "no"]);
    }

    #[test]
    fn test_format_repository_skips_missing_fields() {
        let repo = RepositoryInfo {
            owner: "acme".into(),
            name: "web".into(),
            full_name: "acme/web".into(),
            clone_url: "https://github.com/acme/web.git".into(),
            private: true,
            language: None,
            description: None,
            default_branch: "main".into(),
        };

        let output = format_repository(&repo);
        assert!(output.contains("Default Branch: main"));
        assert!(output.contains("private"));
        assert!(!output.contains("Language:"));
    }
}
