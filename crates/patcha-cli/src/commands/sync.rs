use serde::Serialize;

use patcha_lifecycle::{IdleReason, RefreshReport, RunOptions, RunOutcome};

use super::{Context, idle_message};

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Summary<'a> {
    Served {
        instances: usize,
        deployments: usize,
        expires_at: u64,
    },
    Refreshed(&'a RefreshReport),
    Idle {
        reason: IdleReason,
    },
}

pub async fn sync(ctx: &Context, bootstrap: bool, force: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let controller = ctx.controller(store)?;
    let outcome = controller
        .run(RunOptions {
            bootstrap,
            force_refresh: force,
        })
        .await?;

    let summary = match &outcome {
        RunOutcome::Served { graph, expires_at } => Summary::Served {
            instances: graph.instance_count(),
            deployments: graph.deployment_count(),
            expires_at: *expires_at,
        },
        RunOutcome::Refreshed(report) => Summary::Refreshed(report),
        RunOutcome::Idle(reason) => Summary::Idle { reason: *reason },
    };
    ctx.emit(&summary, render)
}

fn render(summary: &Summary<'_>) -> String {
    match summary {
        Summary::Served {
            instances,
            deployments,
            expires_at,
        } => format!(
            "cache current: {instances} instances, {deployments} deployments (expires at {expires_at})"
        ),
        Summary::Refreshed(report) => render_report(report),
        Summary::Idle { reason } => idle_message(*reason).to_string(),
    }
}

fn render_report(report: &RefreshReport) -> String {
    let mut lines = vec![format!(
        "{:?}: {} projects, {} instances ({} unmanaged), {} deployments ({} matchless)",
        report.action,
        report.projects.len(),
        report.instances,
        report.unmanaged,
        report.deployments,
        report.matchless
    )];
    for anomaly in &report.anomalies {
        lines.push(format!("  anomaly: {anomaly}"));
    }
    for failure in &report.failures {
        lines.push(format!("  failure: {failure}"));
    }
    lines.push(match report.expires_at {
        Some(expires_at) => format!("expires at {expires_at}"),
        None => "partial refresh; expiry not advanced, next sync retries".to_string(),
    });
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use patcha_lifecycle::Action;

    fn report(expires_at: Option<u64>) -> RefreshReport {
        RefreshReport {
            action: Action::Bootstrap,
            projects: vec!["prod".to_string()],
            instances: 3,
            deployments: 2,
            unmanaged: 1,
            matchless: 1,
            anomalies: Vec::new(),
            failures: Vec::new(),
            expires_at,
            complete: expires_at.is_some(),
        }
    }

    #[test]
    fn complete_report_shows_expiry() {
        let text = render_report(&report(Some(42)));
        assert!(text.starts_with("Bootstrap: 1 projects, 3 instances (1 unmanaged)"));
        assert!(text.ends_with("expires at 42"));
    }

    #[test]
    fn partial_report_says_so() {
        let text = render_report(&report(None));
        assert!(text.contains("partial refresh"));
    }

    #[test]
    fn idle_summary_serializes_reason() {
        let summary = Summary::Idle {
            reason: IdleReason::NeverBuilt,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcome"], "idle");
        assert_eq!(json["reason"], "never_built");
        assert!(render(&summary).contains("--bootstrap"));
    }
}
