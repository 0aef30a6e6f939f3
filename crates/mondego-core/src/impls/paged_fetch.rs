//! Chaining runner for paginated collections (source-control style APIs).
//!
//! One job fetches one page. Each item becomes a destination job carrying a
//! [`SinkRecord`], and the next page is chained on the same driver. An empty
//! page ends the chain.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{DriverSpec, FollowOn, Job};
use crate::error::MondegoError;
use crate::ports::{JobRunner, SinkRecord, UpstreamClient};

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Job payload of a [`PagedFetchRunner`] lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Collection url, absolute or relative to the driver's upstream url.
    pub url: String,

    #[serde(default = "default_page")]
    pub page: u32,

    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Record type written to the sink for every item.
    pub record_type: String,

    /// Item field holding the record id.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Nested collections to fetch for every item, e.g. a project's commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildCollection>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page: default_page(),
            per_page: default_per_page(),
            record_type: record_type.into(),
            id_field: default_id_field(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ChildCollection) -> Self {
        self.children.push(child);
        self
    }
}

/// Per-item collection. `{id}` in `url_template` is replaced by the parent's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildCollection {
    pub url_template: String,
    pub record_type: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

pub struct PagedFetchRunner {
    upstream: Arc<dyn UpstreamClient>,
    base: Option<Url>,
    collection: String,
}

impl PagedFetchRunner {
    pub fn new(upstream: Arc<dyn UpstreamClient>, collection: impl Into<String>) -> Self {
        Self {
            upstream,
            base: None,
            collection: collection.into(),
        }
    }

    /// Resolve relative request urls against `base_url`.
    pub fn with_base(mut self, base_url: &str) -> Result<Self, MondegoError> {
        let mut base = Url::parse(base_url).map_err(|e| MondegoError::invalid_url(base_url, e))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        self.base = Some(base);
        Ok(self)
    }

    fn page_url(&self, request: &PageRequest) -> Result<Url, MondegoError> {
        let mut url = match &self.base {
            Some(base) => base.join(request.url.trim_start_matches('/')),
            None => Url::parse(&request.url),
        }
        .map_err(|e| MondegoError::invalid_url(request.url.as_str(), e))?;

        url.query_pairs_mut()
            .append_pair("page", &request.page.to_string())
            .append_pair("per_page", &request.per_page.to_string());
        Ok(url)
    }

    fn record_for(&self, request: &PageRequest, item: &Value) -> Option<(String, SinkRecord)> {
        let id = match item.get(&request.id_field)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let record = SinkRecord::new(
            self.collection.as_str(),
            request.record_type.as_str(),
            id.as_str(),
            item.clone(),
        );
        Some((id, record))
    }
}

/// Items of a page. `null`, `{}` and `[]` are all empty.
fn page_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(map) if map.is_empty() => Vec::new(),
        other => vec![other],
    }
}

#[async_trait]
impl JobRunner for PagedFetchRunner {
    async fn run(&self, driver: &DriverSpec, job: &Job) -> Result<FollowOn, MondegoError> {
        let request: PageRequest = serde_json::from_value(job.payload.clone())?;
        let url = self.page_url(&request)?;
        let fetched = self.upstream.get_json(url.as_str()).await?;

        let items = page_items(fetched.body);
        if items.is_empty() {
            debug!(driver = %driver.id, url = %url, "last page reached");
            return Ok(FollowOn::none());
        }

        let mut next = FollowOn::none();
        for item in &items {
            let Some((id, record)) = self.record_for(&request, item) else {
                warn!(driver = %driver.id, url = %url, id_field = %request.id_field, "item without id, skipped");
                continue;
            };
            next = next.on_destination(serde_json::to_value(&record)?);

            for child in &request.children {
                let child_request = PageRequest {
                    url: child.url_template.replace("{id}", &id),
                    page: default_page(),
                    per_page: request.per_page,
                    record_type: child.record_type.clone(),
                    id_field: child.id_field.clone(),
                    children: Vec::new(),
                };
                next = next.on_driver(serde_json::to_value(&child_request)?);
            }
        }

        let following = PageRequest {
            page: fetched.next_page.unwrap_or(request.page.saturating_add(1)),
            per_page: fetched.per_page.unwrap_or(request.per_page),
            ..request
        };
        debug!(
            driver = %driver.id,
            items = items.len(),
            next_page = following.page,
            "page fetched"
        );
        Ok(next.on_driver(serde_json::to_value(&following)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DriverId;
    use crate::error::UpstreamError;
    use crate::ports::Fetched;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use ulid::Ulid;

    /// Canned responses keyed by full url; unknown urls answer 404.
    #[derive(Default)]
    struct CannedUpstream {
        responses: HashMap<String, Result<Fetched, UpstreamError>>,
        calls: Mutex<Vec<String>>,
    }

    impl CannedUpstream {
        fn with(mut self, url: &str, response: Result<Fetched, UpstreamError>) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl UpstreamClient for CannedUpstream {
        async fn get_json(&self, url: &str) -> Result<Fetched, UpstreamError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .unwrap_or(Err(UpstreamError::Status(404)))
        }
    }

    fn job(request: &PageRequest) -> Job {
        Job::new(
            Ulid::new().into(),
            DriverId::new("gitlab"),
            serde_json::to_value(request).unwrap(),
            Utc::now(),
        )
    }

    fn driver() -> DriverSpec {
        DriverSpec::new("gitlab", 1).unwrap()
    }

    fn runner(upstream: CannedUpstream) -> PagedFetchRunner {
        PagedFetchRunner::new(Arc::new(upstream), "mondego")
            .with_base("https://git.example.com/api/v4")
            .unwrap()
    }

    #[tokio::test]
    async fn full_page_writes_items_and_chains_the_next_page() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=1&per_page=20",
            Ok(Fetched {
                body: json!([{"id": 1, "name": "core"}, {"id": 2, "name": "web"}]),
                next_page: Some(2),
                per_page: Some(50),
            }),
        );
        let request = PageRequest::new("/projects", "repo");

        let next = runner(upstream).run(&driver(), &job(&request)).await.unwrap();

        let records: Vec<SinkRecord> = next
            .on_destination
            .iter()
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key(), "mondego/repo/1");
        assert_eq!(records[1].data["name"], "web");

        assert_eq!(next.on_driver.len(), 1);
        let following: PageRequest = serde_json::from_value(next.on_driver[0].clone()).unwrap();
        assert_eq!(following.page, 2);
        assert_eq!(following.per_page, 50);
        assert_eq!(following.url, "/projects");
    }

    #[tokio::test]
    async fn missing_hints_advance_by_one_page() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=3&per_page=20",
            Ok(Fetched::new(json!([{"id": "a"}]))),
        );
        let request = PageRequest {
            page: 3,
            ..PageRequest::new("projects", "repo")
        };
        let next = runner(upstream).run(&driver(), &job(&request)).await.unwrap();
        let following: PageRequest = serde_json::from_value(next.on_driver[0].clone()).unwrap();
        assert_eq!(following.page, 4);
        assert_eq!(following.per_page, 20);
    }

    #[tokio::test]
    async fn last_representable_page_does_not_overflow() {
        let upstream = CannedUpstream::default().with(
            &format!("https://git.example.com/api/v4/projects?page={}&per_page=20", u32::MAX),
            Ok(Fetched::new(json!([{"id": 1}]))),
        );
        let request = PageRequest {
            page: u32::MAX,
            ..PageRequest::new("projects", "repo")
        };
        let next = runner(upstream).run(&driver(), &job(&request)).await.unwrap();
        let following: PageRequest = serde_json::from_value(next.on_driver[0].clone()).unwrap();
        assert_eq!(following.page, u32::MAX);
    }

    #[tokio::test]
    async fn empty_page_ends_the_chain() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=1&per_page=20",
            Ok(Fetched::new(json!([]))),
        );
        let next = runner(upstream)
            .run(&driver(), &job(&PageRequest::new("projects", "repo")))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn children_are_chained_per_item() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=1&per_page=20",
            Ok(Fetched::new(json!([{"id": 9}]))),
        );
        let request = PageRequest::new("projects", "repo").with_child(ChildCollection {
            url_template: "projects/{id}/repository/commits".into(),
            record_type: "commit".into(),
            id_field: "id".into(),
        });

        let next = runner(upstream).run(&driver(), &job(&request)).await.unwrap();
        let chained: Vec<PageRequest> = next
            .on_driver
            .iter()
            .map(|v| serde_json::from_value(v.clone()).unwrap())
            .collect();
        assert_eq!(chained.len(), 2);
        assert_eq!(chained[0].url, "projects/9/repository/commits");
        assert_eq!(chained[0].record_type, "commit");
        assert_eq!(chained[0].page, 1);
        assert!(chained[0].children.is_empty());
        assert_eq!(chained[1].page, 2);
        assert_eq!(chained[1].children.len(), 1);
    }

    #[tokio::test]
    async fn items_without_id_are_skipped() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=1&per_page=20",
            Ok(Fetched::new(json!([{"name": "no id"}, {"id": 5}]))),
        );
        let next = runner(upstream)
            .run(&driver(), &job(&PageRequest::new("projects", "repo")))
            .await
            .unwrap();
        assert_eq!(next.on_destination.len(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_fails_the_job() {
        let upstream = CannedUpstream::default().with(
            "https://git.example.com/api/v4/projects?page=1&per_page=20",
            Err(UpstreamError::Status(502)),
        );
        let err = runner(upstream)
            .run(&driver(), &job(&PageRequest::new("projects", "repo")))
            .await
            .unwrap_err();
        assert!(matches!(err, MondegoError::Upstream(UpstreamError::Status(502))));
    }

    #[tokio::test]
    async fn absolute_urls_work_without_a_base() {
        let upstream = CannedUpstream::default().with(
            "https://other.example.com/items?page=1&per_page=20",
            Ok(Fetched::new(json!([]))),
        );
        let runner = PagedFetchRunner::new(Arc::new(upstream), "mondego");
        let next = runner
            .run(
                &driver(),
                &job(&PageRequest::new("https://other.example.com/items", "item")),
            )
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[rstest::rstest]
    #[case::null(json!(null), 0)]
    #[case::empty_object(json!({}), 0)]
    #[case::empty_array(json!([]), 0)]
    #[case::single_object(json!({"id": 1}), 1)]
    #[case::array(json!([1, 2, 3]), 3)]
    fn page_item_counts(#[case] body: Value, #[case] count: usize) {
        assert_eq!(page_items(body).len(), count);
    }
}
