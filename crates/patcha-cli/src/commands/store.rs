use std::path::Path;

use anyhow::bail;
use serde::Serialize;
use tracing::info;

use patcha_lifecycle::{Action, RunOptions, StoreState, decide};
use patcha_state::epoch_secs;

use super::Context;

#[derive(Serialize)]
struct Status {
    now: u64,
    #[serde(flatten)]
    state: StoreState,
    next_sync: Action,
    projects: Vec<String>,
}

pub fn status(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let now = epoch_secs();
    let state = StoreState::read(store.as_ref(), now)?;
    let status = Status {
        now,
        state,
        next_sync: decide(&state, RunOptions::default()),
        projects: ctx.config.projects.clone(),
    };
    ctx.emit(&status, render_status)
}

fn render_status(status: &Status) -> String {
    let stamp = |t: Option<u64>| t.map_or_else(|| "never".to_string(), |t| t.to_string());
    [
        format!("empty:      {}", status.state.empty),
        format!("built at:   {}", stamp(status.state.built_at)),
        format!("expires at: {}", stamp(status.state.expires_at)),
        format!("cleared at: {}", stamp(status.state.cleared_at)),
        format!("expired:    {}", status.state.expired),
        format!("next sync:  {:?}", status.next_sync),
        format!("projects:   {}", status.projects.join(", ")),
    ]
    .join("\n")
}

pub fn clear(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    store.clear()?;
    info!("cache cleared");
    ctx.emit(&serde_json::json!({ "cleared": true }), |_| "cache cleared".to_string())
}

pub fn init(ctx: &Context, path: &Path, projects: Vec<String>, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let mut config = ctx.config.clone();
    if !projects.is_empty() {
        config.projects = projects;
    }
    std::fs::write(path, config.to_toml_string()?)?;
    println!("Generated {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Format;
    use patcha_core::PatchaConfig;

    #[test]
    fn status_text_lists_state() {
        let status = Status {
            now: 10,
            state: StoreState {
                empty: true,
                expired: true,
                expires_at: None,
                built_at: None,
                cleared_at: None,
            },
            next_sync: Action::Bootstrap,
            projects: vec!["prod".to_string(), "staging".to_string()],
        };
        let text = render_status(&status);
        assert!(text.contains("expires at: never"));
        assert!(text.contains("cleared at: never"));
        assert!(text.contains("next sync:  Bootstrap"));
        assert!(text.contains("prod, staging"));
    }

    #[test]
    fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patcha.toml");
        let ctx = Context {
            config: PatchaConfig::default(),
            format: Format::Text,
        };

        init(&ctx, &path, vec!["prod".to_string()], false).unwrap();
        let written = PatchaConfig::from_file(&path).unwrap();
        assert_eq!(written.projects, vec!["prod"]);

        assert!(init(&ctx, &path, Vec::new(), false).is_err());
        init(&ctx, &path, Vec::new(), true).unwrap();
    }
}
