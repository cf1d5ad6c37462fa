//! Fleet source abstraction and the paginating adapter in front of it.
//!
//! [`FleetSource`] is the page-level API of whatever system of record holds
//! the fleet. [`FleetAdapter`] hides pagination from the reconciler: it walks
//! the pages under a per-call timeout and returns a [`Listing`], which is
//! either the full set or the items gathered before the first failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use patcha_core::{DeploymentDescriptor, InstanceDescriptor};

use crate::error::{SourceError, SourceResult};

/// Pages fetched before a listing is considered runaway.
const DEFAULT_MAX_PAGES: usize = 10_000;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the next page; `None` (or empty) on the last page.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// The final page of a listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    /// A page followed by more.
    pub fn more(items: Vec<T>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
        }
    }
}

/// Boxed future alias for fleet source page calls.
pub type PageFuture<'a, T> = Pin<Box<dyn Future<Output = SourceResult<Page<T>>> + Send + 'a>>;

/// Page-level access to the fleet's system of record.
///
/// Implementations are injected into [`FleetAdapter`]; the cloud client in
/// production, [`crate::InventorySource`] for exported inventories, scripted
/// sources in tests.
pub trait FleetSource: Send + Sync {
    /// Patch deployments defined in a project.
    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, DeploymentDescriptor>;

    /// Every instance in a project, independent of any deployment.
    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor>;

    /// Instances the deployment's filter currently selects.
    fn list_instances_for_deployment<'a>(
        &'a self,
        deployment: &'a DeploymentDescriptor,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor>;
}

impl<S: FleetSource + ?Sized> FleetSource for Arc<S> {
    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, DeploymentDescriptor> {
        (**self).list_deployments(project, page_token)
    }

    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor> {
        (**self).list_instances(project, page_token)
    }

    fn list_instances_for_deployment<'a>(
        &'a self,
        deployment: &'a DeploymentDescriptor,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor> {
        (**self).list_instances_for_deployment(deployment, page_token)
    }
}

/// A fully paginated listing, possibly cut short by a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing<T> {
    /// Items from every page fetched successfully.
    pub items: Vec<T>,
    /// Why the listing stopped early, if it did.
    pub failure: Option<SourceError>,
}

impl<T> Listing<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            failure: None,
        }
    }

    pub fn partial(items: Vec<T>, failure: SourceError) -> Self {
        Self {
            items,
            failure: Some(failure),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Walks source pages under a per-call timeout.
pub struct FleetAdapter<S> {
    source: S,
    call_timeout: Duration,
    max_pages: usize,
}

impl<S: FleetSource> FleetAdapter<S> {
    pub fn new(source: S, call_timeout: Duration) -> Self {
        Self {
            source,
            call_timeout,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Cap the number of pages one listing may span.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// All patch deployments in a project.
    pub async fn deployments(&self, project: &str) -> Listing<DeploymentDescriptor> {
        self.collect(project, "deployments", |token| {
            self.source.list_deployments(project, token)
        })
        .await
    }

    /// All instances in a project.
    pub async fn instances(&self, project: &str) -> Listing<InstanceDescriptor> {
        self.collect(project, "instances", |token| {
            self.source.list_instances(project, token)
        })
        .await
    }

    /// All instances a deployment selects.
    pub async fn instances_for_deployment(
        &self,
        deployment: &DeploymentDescriptor,
    ) -> Listing<InstanceDescriptor> {
        self.collect(&deployment.project, &deployment.name, |token| {
            self.source.list_instances_for_deployment(deployment, token)
        })
        .await
    }

    async fn collect<'a, T, F>(&self, project: &str, what: &str, mut fetch: F) -> Listing<T>
    where
        F: FnMut(Option<String>) -> PageFuture<'a, T>,
    {
        let mut items = Vec::new();
        let mut token: Option<String> = None;

        for page_no in 0..self.max_pages {
            let call = fetch(token.clone());
            let page = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    warn!(%project, what, page = page_no, error = %e, "listing failed");
                    return Listing::partial(items, e);
                }
                Err(_) => {
                    warn!(%project, what, page = page_no, timeout = ?self.call_timeout, "listing timed out");
                    return Listing::partial(items, SourceError::Timeout(self.call_timeout));
                }
            };

            debug!(%project, what, page = page_no, items = page.items.len(), "page fetched");
            items.extend(page.items);

            match page.next_page_token.filter(|next| !next.is_empty()) {
                None => return Listing::complete(items),
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    let e = SourceError::Pagination(format!("page token {next:?} repeated"));
                    warn!(%project, what, error = %e, "listing stopped");
                    return Listing::partial(items, e);
                }
                Some(next) => token = Some(next),
            }
        }

        let e = SourceError::Pagination(format!("more than {} pages", self.max_pages));
        warn!(%project, what, error = %e, "listing stopped");
        Listing::partial(items, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves pre-scripted pages keyed by `(listing, token)`.
    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<(String, Option<String>), SourceResult<Page<InstanceDescriptor>>>,
        stall: Option<Duration>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn page(
            mut self,
            listing: &str,
            token: Option<&str>,
            result: SourceResult<Page<InstanceDescriptor>>,
        ) -> Self {
            self.pages
                .insert((listing.to_string(), token.map(str::to_string)), result);
            self
        }

        fn serve(&self, listing: &str, token: Option<String>) -> PageFuture<'_, InstanceDescriptor> {
            self.calls.lock().unwrap().push(token.clone());
            let result = self
                .pages
                .get(&(listing.to_string(), token))
                .cloned()
                .unwrap_or_else(|| Err(SourceError::Unavailable("no such page".to_string())));
            let stall = self.stall;
            Box::pin(async move {
                if let Some(stall) = stall {
                    tokio::time::sleep(stall).await;
                }
                result
            })
        }
    }

    impl FleetSource for ScriptedSource {
        fn list_deployments<'a>(
            &'a self,
            project: &'a str,
            _page_token: Option<String>,
        ) -> PageFuture<'a, DeploymentDescriptor> {
            let deployment = DeploymentDescriptor::named(project, "dep1");
            Box::pin(async move { Ok(Page::last(vec![deployment])) })
        }

        fn list_instances<'a>(
            &'a self,
            project: &'a str,
            page_token: Option<String>,
        ) -> PageFuture<'a, InstanceDescriptor> {
            self.serve(project, page_token)
        }

        fn list_instances_for_deployment<'a>(
            &'a self,
            deployment: &'a DeploymentDescriptor,
            page_token: Option<String>,
        ) -> PageFuture<'a, InstanceDescriptor> {
            self.serve(&deployment.name, page_token)
        }
    }

    fn vm(name: &str) -> InstanceDescriptor {
        InstanceDescriptor::named("prod", name)
    }

    fn adapter(source: ScriptedSource) -> FleetAdapter<ScriptedSource> {
        FleetAdapter::new(source, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn single_page_listing_is_complete() {
        let source = ScriptedSource::default().page("prod", None, Ok(Page::last(vec![vm("vm-a")])));
        let listing = adapter(source).instances("prod").await;
        assert!(listing.is_complete());
        assert_eq!(listing.items, vec![vm("vm-a")]);
    }

    #[tokio::test]
    async fn pages_are_concatenated_in_order() {
        let source = ScriptedSource::default()
            .page("dep1", None, Ok(Page::more(vec![vm("vm-a"), vm("vm-b")], "p2")))
            .page("dep1", Some("p2"), Ok(Page::more(vec![vm("vm-c")], "p3")))
            .page("dep1", Some("p3"), Ok(Page::last(vec![vm("vm-d")])));
        let adapter = adapter(source);
        let listing = adapter
            .instances_for_deployment(&DeploymentDescriptor::named("prod", "dep1"))
            .await;

        assert!(listing.is_complete());
        let names: Vec<&str> = listing.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["vm-a", "vm-b", "vm-c", "vm-d"]);
        assert_eq!(
            *adapter.source().calls.lock().unwrap(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_token_ends_listing() {
        let source = ScriptedSource::default().page("prod", None, Ok(Page::more(vec![vm("vm-a")], "")));
        let listing = adapter(source).instances("prod").await;
        assert!(listing.is_complete());
        assert_eq!(listing.items.len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_earlier_pages() {
        let source = ScriptedSource::default()
            .page("prod", None, Ok(Page::more(vec![vm("vm-a")], "p2")))
            .page("prod", Some("p2"), Err(SourceError::QuotaExceeded("compute.list".to_string())));
        let listing = adapter(source).instances("prod").await;

        assert_eq!(listing.items, vec![vm("vm-a")]);
        assert_eq!(
            listing.failure,
            Some(SourceError::QuotaExceeded("compute.list".to_string()))
        );
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let mut source = ScriptedSource::default().page("prod", None, Ok(Page::last(vec![vm("vm-a")])));
        source.stall = Some(Duration::from_secs(5));
        let listing = FleetAdapter::new(source, Duration::from_millis(20))
            .instances("prod")
            .await;

        assert!(listing.items.is_empty());
        assert_eq!(listing.failure, Some(SourceError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn repeated_token_is_rejected() {
        let source = ScriptedSource::default()
            .page("prod", None, Ok(Page::more(vec![vm("vm-a")], "p2")))
            .page("prod", Some("p2"), Ok(Page::more(vec![vm("vm-b")], "p2")));
        let listing = adapter(source).instances("prod").await;

        assert_eq!(listing.items.len(), 2);
        assert!(matches!(listing.failure, Some(SourceError::Pagination(_))));
    }

    #[tokio::test]
    async fn page_cap_stops_runaway_listing() {
        let source = ScriptedSource::default()
            .page("prod", None, Ok(Page::more(vec![vm("vm-a")], "p2")))
            .page("prod", Some("p2"), Ok(Page::more(vec![vm("vm-b")], "p3")))
            .page("prod", Some("p3"), Ok(Page::last(vec![vm("vm-c")])));
        let listing = adapter(source).with_max_pages(2).instances("prod").await;

        assert_eq!(listing.items.len(), 2);
        assert!(matches!(listing.failure, Some(SourceError::Pagination(_))));
    }
}
