use std::sync::Arc;

use anyhow::bail;
use tracing::info;

use patcha_lifecycle::{Action, RunOptions, RunOutcome, StoreState, decide};
use patcha_state::{CacheStore, epoch_secs};

use super::{Context, format_deployments, format_instances, idle_message};

/// Open the store and make sure it can answer: serve a current snapshot,
/// refresh an expired one, refuse an empty one.
async fn current_store(ctx: &Context) -> anyhow::Result<Arc<dyn CacheStore>> {
    let store = ctx.open_store()?;
    let state = StoreState::read(store.as_ref(), epoch_secs())?;

    match decide(&state, RunOptions::default()) {
        Action::Serve => Ok(store),
        Action::Idle(reason) => bail!(idle_message(reason)),
        Action::Refresh | Action::Bootstrap => {
            info!("cache expired; refreshing before answering");
            match ctx.controller(store.clone())?.run(RunOptions::default()).await? {
                RunOutcome::Idle(reason) => bail!(idle_message(reason)),
                RunOutcome::Served { .. } | RunOutcome::Refreshed(_) => Ok(store),
            }
        }
    }
}

pub async fn unmanaged(ctx: &Context) -> anyhow::Result<()> {
    let store = current_store(ctx).await?;
    let instances = store.instances_with_no_deployments()?;
    ctx.emit(&instances, |i| format_instances(i))
}

pub async fn matchless(ctx: &Context) -> anyhow::Result<()> {
    let store = current_store(ctx).await?;
    let deployments = store.deployments_with_no_instances()?;
    ctx.emit(&deployments, |d| format_deployments(d))
}

pub async fn instances_for(ctx: &Context, project: &str, deployment: &str) -> anyhow::Result<()> {
    let store = current_store(ctx).await?;
    let instances = store.instances_for_deployment(project, deployment)?;
    ctx.emit(&instances, |i| format_instances(i))
}

pub async fn deployments_for(ctx: &Context, project: &str, instance: &str) -> anyhow::Result<()> {
    let store = current_store(ctx).await?;
    let deployments = store.deployments_for_instance(project, instance)?;
    ctx.emit(&deployments, |d| format_deployments(d))
}
