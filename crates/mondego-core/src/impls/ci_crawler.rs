//! Throttled crawl of a CI server.
//!
//! The server is walked root -> jobs -> builds, and job -> promotion processes
//! -> promotions. Every HTTP call is one task on a [`PacedQueue`], so the crawl
//! never has more than one request outstanding and backs off when the server
//! struggles. Builds are written as `build` records, promotions as `release`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use reqwest::Url;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::attribution::find_attribution;
use crate::app::{Pace, PacedQueue};
use crate::error::MondegoError;
use crate::ports::{SinkRecord, SinkWriter, UpstreamClient};

const API_SUFFIX: &str = "api/json";
const PROMOTION_SUFFIX: &str = "promotion/api/json";

struct Crawl {
    base: Url,
    upstream: Arc<dyn UpstreamClient>,
    sink: Arc<dyn SinkWriter>,
    collection: String,
    queue: PacedQueue,
}

/// Cheap to clone; clones share the same queue and sink.
#[derive(Clone)]
pub struct CiCrawler {
    crawl: Arc<Crawl>,
}

impl CiCrawler {
    pub fn new(
        base_url: &str,
        upstream: Arc<dyn UpstreamClient>,
        sink: Arc<dyn SinkWriter>,
        collection: impl Into<String>,
        queue: PacedQueue,
    ) -> Result<Self, MondegoError> {
        let mut base = Url::parse(base_url).map_err(|e| MondegoError::invalid_url(base_url, e))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            crawl: Arc::new(Crawl {
                base,
                upstream,
                sink,
                collection: collection.into(),
                queue,
            }),
        })
    }

    /// Queue the root call. Everything else is discovered from there.
    pub fn start(&self) -> Result<(), MondegoError> {
        info!(base = %self.crawl.base, "starting CI crawl");
        self.get(API_SUFFIX.to_string(), |crawler, root| crawler.on_root(&root))
    }

    /// Queue one paced GET. `then` runs on the decoded body inside the task.
    ///
    /// Transport errors and 5xx slow the queue down. The call itself is never
    /// repeated.
    fn get<F>(&self, path: String, then: F) -> Result<(), MondegoError>
    where
        F: FnOnce(&CiCrawler, Value) -> Result<(), MondegoError> + Send + 'static,
    {
        let url = self
            .crawl
            .base
            .join(&path)
            .map_err(|e| MondegoError::invalid_url(path.as_str(), e))?;
        let crawler = self.clone();

        self.crawl.queue.enqueue(async move {
            debug!(url = %url, "calling CI server");
            let result = crawler.crawl.upstream.get_json(url.as_str()).await;
            let pace = Pace::for_call(&result);
            match result {
                Ok(fetched) => {
                    if let Err(err) = then(&crawler, fetched.body) {
                        warn!(url = %url, error = %err, "could not follow CI response");
                    }
                }
                Err(err) => warn!(url = %url, error = %err, "CI call failed"),
            }
            pace
        })
    }

    fn on_root(&self, root: &Value) -> Result<(), MondegoError> {
        for summary in array(root, "jobs") {
            let Some(path) = api_path(summary, API_SUFFIX) else {
                continue;
            };
            self.get(path, |crawler, job| crawler.on_job(&job))?;
        }
        Ok(())
    }

    fn on_job(&self, job: &Value) -> Result<(), MondegoError> {
        let name = job["name"].as_str().unwrap_or_default().to_string();

        for build in array(job, "builds") {
            let Some(path) = api_path(build, API_SUFFIX) else {
                continue;
            };
            let repo = name.clone();
            self.get(path, move |crawler, build| {
                crawler.write("build", &repo, &build, build["number"].clone());
                Ok(())
            })?;
        }

        if let Some(path) = api_path(job, PROMOTION_SUFFIX) {
            self.get(path, move |crawler, promotion| {
                crawler.on_processes(&name, &promotion)
            })?;
        }
        Ok(())
    }

    fn on_processes(&self, repo: &str, promotion: &Value) -> Result<(), MondegoError> {
        for process in array(promotion, "processes") {
            let Some(path) = api_path(process, API_SUFFIX) else {
                continue;
            };
            let repo = repo.to_string();
            self.get(path, move |crawler, process| {
                crawler.on_process(&repo, &process)
            })?;
        }
        Ok(())
    }

    fn on_process(&self, repo: &str, process: &Value) -> Result<(), MondegoError> {
        for release in array(process, "builds") {
            let Some(path) = api_path(release, API_SUFFIX) else {
                continue;
            };
            let repo = repo.to_string();
            self.get(path, move |crawler, release| {
                crawler.write("release", &repo, &release, release["target"]["number"].clone());
                Ok(())
            })?;
        }
        Ok(())
    }

    fn write(&self, record_type: &str, repo: &str, got: &Value, build_number: Value) {
        let Some(id) = scalar_id(&got["id"]) else {
            warn!(record_type, repo, "CI record without id, skipped");
            return;
        };
        let data = ci_record(&id, repo, got, build_number);
        self.crawl.sink.write(SinkRecord::new(
            self.crawl.collection.as_str(),
            record_type,
            id,
            data,
        ));
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value[key].as_array().map(Vec::as_slice).unwrap_or_default()
}

/// Path of the entry's `url` with `suffix` appended.
///
/// CI servers return absolute urls that may not match the configured host, so
/// only the path is kept and later resolved against the base.
fn api_path(entry: &Value, suffix: &str) -> Option<String> {
    let raw = entry["url"].as_str()?;
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw.to_string(),
    };
    if path.ends_with('/') {
        Some(format!("{path}{suffix}"))
    } else {
        Some(format!("{path}/{suffix}"))
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Epoch milliseconds as an RFC 3339 UTC timestamp with millisecond precision.
fn iso_timestamp(value: &Value) -> Value {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(|at| Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .unwrap_or(Value::Null)
}

fn ci_record(id: &str, repo: &str, got: &Value, build_number: Value) -> Value {
    json!({
        "id": id,
        "repoName": repo,
        "buildNumber": build_number,
        "duration": got["duration"],
        "created_timestamp": iso_timestamp(&got["timestamp"]),
        "status": got["result"],
        "description": got["description"],
        "url": got["url"],
        "user": find_attribution(got),
    })
}
