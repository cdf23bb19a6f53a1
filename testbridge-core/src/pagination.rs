//! Offset/limit cursor over the remote list calls.
//!
//! A page that comes back full (`items.len() == limit`) may be followed by
//! more records, so its cursor carries `next_offset = offset + limit`. A
//! short page ends the listing. When the total is an exact multiple of the
//! limit, the caller makes one extra request that returns an empty page.

use serde::Serialize;
use std::future::Future;

use crate::contract::{Field, ListParams, Milestone, Project, Tag, Template, TestOpsClient};
use crate::error::RemoteError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageCursor<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub next_offset: Option<u64>,
}

impl<T> PageCursor<T> {
    pub fn from_page(items: Vec<T>, limit: u64, offset: u64) -> Self {
        let count = items.len();
        // An offset past u64::MAX cannot be requested, so the listing ends there.
        let next_offset = if limit > 0 && count as u64 == limit {
            offset.checked_add(limit)
        } else {
            None
        };
        Self {
            items,
            count,
            next_offset,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_offset.is_some()
    }
}

/// Fetches one page through `fetch` and wraps it in a cursor.
pub async fn list_page<T, F, Fut>(limit: u64, offset: u64, fetch: F) -> Result<PageCursor<T>, RemoteError>
where
    F: FnOnce(ListParams) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteError>>,
{
    let items = fetch(ListParams { limit, offset }).await?;
    Ok(PageCursor::from_page(items, limit, offset))
}

/// Follows `next_offset` from offset 0 until a short page and returns every
/// item in order.
pub async fn collect_all<T, F, Fut>(limit: u64, mut fetch: F) -> Result<Vec<T>, RemoteError>
where
    F: FnMut(ListParams) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteError>>,
{
    let mut all = Vec::new();
    let mut offset = Some(0);
    while let Some(current) = offset {
        let page = list_page(limit, current, &mut fetch).await?;
        tracing::debug!(offset = current, count = page.count, "fetched page");
        offset = page.next_offset;
        all.extend(page.items);
    }
    Ok(all)
}

/// Cursor-returning view over a client's list operations.
pub struct Catalog<'a, C: TestOpsClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: TestOpsClient + ?Sized> Catalog<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub async fn projects(&self, limit: u64, offset: u64) -> Result<PageCursor<Project>, RemoteError> {
        list_page(limit, offset, |p| self.client.list_projects(p)).await
    }

    pub async fn fields(&self, limit: u64, offset: u64) -> Result<PageCursor<Field>, RemoteError> {
        list_page(limit, offset, |p| self.client.list_fields(p)).await
    }

    pub async fn tags(&self, limit: u64, offset: u64) -> Result<PageCursor<Tag>, RemoteError> {
        list_page(limit, offset, |p| self.client.list_tags(p)).await
    }

    pub async fn templates(&self, limit: u64, offset: u64) -> Result<PageCursor<Template>, RemoteError> {
        list_page(limit, offset, |p| self.client.list_templates(p)).await
    }

    pub async fn milestones(&self, limit: u64, offset: u64) -> Result<PageCursor<Milestone>, RemoteError> {
        list_page(limit, offset, |p| self.client.list_milestones(p)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockTestOpsClient;

    #[test]
    fn full_page_points_at_next_offset() {
        let page = PageCursor::from_page((0..10).collect::<Vec<_>>(), 10, 20);
        assert_eq!(page.count, 10);
        assert_eq!(page.next_offset, Some(30));
        assert!(page.has_more());
    }

    #[test]
    fn short_page_ends_listing() {
        let page = PageCursor::from_page((0..7).collect::<Vec<_>>(), 10, 20);
        assert_eq!(page.count, 7);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn zero_limit_never_continues() {
        let page: PageCursor<u8> = PageCursor::from_page(Vec::new(), 0, 0);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn full_page_at_the_end_of_the_offset_range_ends_listing() {
        let page = PageCursor::from_page(vec![1u8, 2], 2, u64::MAX - 1);
        assert_eq!(page.next_offset, None);
        let page = PageCursor::from_page(vec![1u8, 2], 2, u64::MAX - 2);
        assert_eq!(page.next_offset, Some(u64::MAX));
    }

    #[tokio::test]
    async fn collect_all_follows_offsets_until_short_page() {
        let data: Vec<u32> = (0..25).collect();
        let mut requested = Vec::new();
        let all = collect_all(10, |params: ListParams| {
            requested.push(params.offset);
            let start = params.offset as usize;
            let end = (start + params.limit as usize).min(data.len());
            let page = data[start.min(end)..end].to_vec();
            async move { Ok(page) }
        })
        .await
        .unwrap();
        assert_eq!(all, data);
        assert_eq!(requested, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn exact_multiple_costs_one_empty_request() {
        let mut calls = 0;
        let all = collect_all(5, |params: ListParams| {
            calls += 1;
            let page: Vec<u64> = if params.offset < 10 {
                (params.offset..params.offset + 5).collect()
            } else {
                Vec::new()
            };
            async move { Ok(page) }
        })
        .await
        .unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn catalog_wraps_client_pages() {
        let mut client = MockTestOpsClient::new();
        client
            .expect_list_tags()
            .withf(|p| p.limit == 2 && p.offset == 4)
            .returning(|_| {
                Ok(vec![
                    Tag {
                        id: "1".into(),
                        title: "smoke".into(),
                    },
                    Tag {
                        id: "2".into(),
                        title: "auth".into(),
                    },
                ])
            });
        let page = Catalog::new(&client).tags(2, 4).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.next_offset, Some(6));
    }

    #[tokio::test]
    async fn catalog_propagates_remote_errors() {
        let mut client = MockTestOpsClient::new();
        client
            .expect_list_projects()
            .returning(|_| Err(RemoteError::rejected("forbidden")));
        let err = Catalog::new(&client).projects(10, 0).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
