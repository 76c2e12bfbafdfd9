//! Paginated discovery of the functions to benchmark.

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use regex::Regex;
use std::sync::Arc;

use crate::error::BenchError;
use crate::service::InvocationService;
use crate::types::{FunctionDescriptor, TagFilter};

pub const DEFAULT_PAGE_SIZE: i32 = 50;

/// Tag lookups issued at once while filtering a single page.
const TAG_LOOKUP_CONCURRENCY: usize = 10;

/// Cheap name-based selection applied before any tag lookup.
#[derive(Debug, Clone)]
pub enum NameFilter {
    Substring(String),
    Regex(Regex),
}

impl NameFilter {
    pub fn matches(&self, descriptor: &FunctionDescriptor) -> bool {
        match self {
            NameFilter::Substring(s) => descriptor.name.contains(s.as_str()),
            NameFilter::Regex(re) => re.is_match(&descriptor.name),
        }
    }
}

pub struct FunctionCatalog {
    service: Arc<dyn InvocationService>,
    page_size: i32,
    name_filter: Option<NameFilter>,
}

impl FunctionCatalog {
    pub fn new(service: Arc<dyn InvocationService>) -> Self {
        Self {
            service,
            page_size: DEFAULT_PAGE_SIZE,
            name_filter: None,
        }
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_name_filter(mut self, filter: Option<NameFilter>) -> Self {
        self.name_filter = filter;
        self
    }

    /// Starts a fresh listing. Each call restarts from the first page.
    pub fn pages(&self, tag_filter: Option<TagFilter>) -> CatalogPages {
        CatalogPages {
            service: Arc::clone(&self.service),
            page_size: self.page_size,
            name_filter: self.name_filter.clone(),
            tag_filter,
            next_token: None,
            exhausted: false,
            fetched: 0,
        }
    }
}

/// A lazy, single-pass walk over the listing.
pub struct CatalogPages {
    service: Arc<dyn InvocationService>,
    page_size: i32,
    name_filter: Option<NameFilter>,
    tag_filter: Option<TagFilter>,
    next_token: Option<String>,
    exhausted: bool,
    fetched: usize,
}

impl CatalogPages {
    /// Fetches the next page and applies the filters. `Ok(None)` once the
    /// listing is exhausted. A page may come back empty when everything on
    /// it was filtered out.
    pub async fn next_page(&mut self) -> Result<Option<Vec<FunctionDescriptor>>, BenchError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = match self
            .service
            .list_functions(self.next_token.take(), self.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                return Err(BenchError::Discovery(format!(
                    "Failed to list functions (page {}): {}",
                    self.fetched + 1,
                    e
                )));
            }
        };
        self.fetched += 1;
        self.next_token = page.next_token;
        self.exhausted = self.next_token.is_none();

        let listed = page.functions.len();
        let candidates: Vec<FunctionDescriptor> = page
            .functions
            .into_iter()
            .filter(|d| self.name_filter.as_ref().is_none_or(|f| f.matches(d)))
            .collect();

        let selected = match &self.tag_filter {
            Some(filter) => self.filter_by_tag(candidates, filter).await?,
            None => candidates,
        };

        tracing::debug!(
            page = self.fetched,
            listed,
            selected = selected.len(),
            "Fetched function page"
        );
        Ok(Some(selected))
    }

    async fn filter_by_tag(
        &self,
        candidates: Vec<FunctionDescriptor>,
        filter: &TagFilter,
    ) -> Result<Vec<FunctionDescriptor>, BenchError> {
        let service = &self.service;
        let tagged: Vec<FunctionDescriptor> = stream::iter(candidates)
            .map(|mut descriptor| async move {
                descriptor.tags = service.get_tags(&descriptor.arn).await.map_err(|e| {
                    BenchError::Discovery(format!(
                        "Failed to list tags for '{}': {}",
                        descriptor.name, e
                    ))
                })?;
                Ok::<_, BenchError>(descriptor)
            })
            .buffered(TAG_LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(tagged
            .into_iter()
            .filter(|d| {
                let keep = filter.matches(&d.tags);
                if !keep {
                    tracing::debug!(function = %d.name, tag = %filter.key, "Skipping function, tag missing or mismatched");
                }
                keep
            })
            .collect())
    }

    /// Adapts the walk into a stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<FunctionDescriptor>, BenchError>> {
        stream::try_unfold(self, |mut pages| async move {
            Ok::<_, BenchError>(pages.next_page().await?.map(|page| (page, pages)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceError;
    use crate::testing::{descriptor, FakeInvocationService};

    fn names(page: &[FunctionDescriptor]) -> Vec<&str> {
        page.iter().map(|d| d.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_walks_all_pages() {
        let service = Arc::new(FakeInvocationService::new(vec![
            Ok(vec![descriptor("a"), descriptor("b")]),
            Ok(vec![descriptor("c")]),
        ]));
        let catalog = FunctionCatalog::new(service.clone());
        let mut pages = catalog.pages(None);

        assert_eq!(names(&pages.next_page().await.unwrap().unwrap()), ["a", "b"]);
        assert_eq!(names(&pages.next_page().await.unwrap().unwrap()), ["c"]);
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(service.list_calls(), 2);
        assert_eq!(service.tag_calls(), 0);
    }

    #[tokio::test]
    async fn test_tag_filter_excludes_silently() {
        let service = Arc::new(
            FakeInvocationService::new(vec![Ok(vec![
                descriptor("rust-fn"),
                descriptor("go-fn"),
                descriptor("untagged"),
            ])])
            .with_tag("rust-fn", "language", "rust")
            .with_tag("go-fn", "language", "go"),
        );
        let catalog = FunctionCatalog::new(service.clone());
        let mut pages = catalog.pages(Some(TagFilter::new("language", "rust")));

        let page = pages.next_page().await.unwrap().unwrap();
        assert_eq!(names(&page), ["rust-fn"]);
        assert_eq!(page[0].tags.get("language").map(String::as_str), Some("rust"));
        assert_eq!(service.tag_calls(), 3);
    }

    #[tokio::test]
    async fn test_name_filter_runs_before_tag_lookup() {
        let service = Arc::new(
            FakeInvocationService::new(vec![Ok(vec![
                descriptor("svc-a-rust"),
                descriptor("svc-b-rust"),
            ])])
            .with_tag("svc-a-rust", "language", "rust")
            .with_tag("svc-b-rust", "language", "rust"),
        );
        let catalog = FunctionCatalog::new(service.clone())
            .with_name_filter(Some(NameFilter::Substring("svc-a".to_string())));
        let mut pages = catalog.pages(Some(TagFilter::new("language", "rust")));

        assert_eq!(names(&pages.next_page().await.unwrap().unwrap()), ["svc-a-rust"]);
        assert_eq!(service.tag_calls(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let service = Arc::new(FakeInvocationService::new(vec![
            Ok(vec![descriptor("a")]),
            Err(ServiceError::Other("AccessDeniedException".to_string())),
        ]));
        let catalog = FunctionCatalog::new(service.clone());
        let mut pages = catalog.pages(None);

        assert!(pages.next_page().await.unwrap().is_some());
        let err = pages.next_page().await.unwrap_err();
        assert!(matches!(err, BenchError::Discovery(ref msg) if msg.contains("page 2")));
        assert!(pages.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pages_restart_per_call() {
        let service = Arc::new(FakeInvocationService::new(vec![
            Ok(vec![descriptor("a")]),
            Ok(vec![descriptor("b")]),
        ]));
        let catalog = FunctionCatalog::new(service.clone());

        let first: Vec<Vec<FunctionDescriptor>> =
            catalog.pages(None).into_stream().try_collect().await.unwrap();
        let second: Vec<Vec<FunctionDescriptor>> =
            catalog.pages(None).into_stream().try_collect().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(service.list_calls(), 4);
    }

    #[test]
    fn test_regex_name_filter() {
        let filter = NameFilter::Regex(Regex::new("^bench-(rust|go)$").unwrap());
        assert!(filter.matches(&descriptor("bench-rust")));
        assert!(!filter.matches(&descriptor("bench-java")));
    }
}
