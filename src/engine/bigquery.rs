//! BigQuery REST client.
//!
//! Dry runs go through `jobs.insert` with `dryRun: true`, so nothing is
//! scanned or billed. View replacement is a single `tables.patch` carrying
//! the full new definition.

use std::time::Duration;

use log::debug;
use reqwest::{
    Method, StatusCode,
    blocking::{Client, RequestBuilder},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    engine::{DryRun, QueryEngine},
    error::EngineError,
};

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const ACCESS_TOKEN_ENV: &str = "BIGQUERY_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Parses `project.dataset.table`, optionally wrapped in backticks.
    pub fn parse(reference: &str) -> Result<Self, EngineError> {
        let trimmed = reference.trim().trim_matches('`');
        let parts = trimmed.split('.').collect::<Vec<_>>();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(TableRef {
                    project: project.to_string(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                })
            }
            _ => Err(EngineError::Permanent(format!(
                "'{reference}' is not a fully-qualified project.dataset.table reference"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    view: Option<ViewDefinition>,
}

#[derive(Debug, Deserialize)]
struct ViewDefinition {
    query: String,
}

pub struct BigQueryEngine {
    client: Client,
    base_url: String,
    project: String,
    token: String,
}

impl BigQueryEngine {
    pub fn new(
        project: &str,
        token: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EngineError::Permanent(format!("Building HTTP client: {err}")))?;
        Ok(BigQueryEngine {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            project: project.to_string(),
            token: token.to_string(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/projects/{}/jobs", self.base_url, self.project)
    }

    fn table_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.base_url, table.project, table.dataset, table.table
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{method} {url}");
        self.client.request(method, url).bearer_auth(&self.token)
    }

    fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), EngineError> {
        let response = builder.send().map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        Ok((status, body))
    }
}

impl QueryEngine for BigQueryEngine {
    fn dry_run(&self, sql: &str) -> Result<DryRun, EngineError> {
        let payload = json!({
            "configuration": {
                "dryRun": true,
                "query": { "query": sql, "useLegacySql": false }
            }
        });
        let (status, body) =
            self.send(self.request(Method::POST, &self.jobs_url()).json(&payload))?;
        dry_run_outcome(status, &body)
    }

    fn replace_view(&self, view: &str, sql: &str) -> Result<(), EngineError> {
        let table = TableRef::parse(view)?;
        let payload = json!({ "view": { "query": sql, "useLegacySql": false } });
        let (status, body) =
            self.send(self.request(Method::PATCH, &self.table_url(&table)).json(&payload))?;
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_failure(status, &body))
        }
    }

    fn view_definition(&self, view: &str) -> Result<Option<String>, EngineError> {
        let table = TableRef::parse(view)?;
        let (status, body) = self.send(self.request(Method::GET, &self.table_url(&table)))?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        let resource: TableResource = serde_json::from_str(&body).map_err(|err| {
            EngineError::Permanent(format!("Unexpected table resource for {view}: {err}"))
        })?;
        Ok(resource.view.map(|view| view.query))
    }
}

fn transport_error(err: reqwest::Error) -> EngineError {
    EngineError::Transient(err.to_string())
}

/// Extracts `error.message` from a BigQuery error payload, falling back to
/// the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

/// Maps a dry-run response to a verdict. Invalid queries come back as 400 and
/// unresolvable tables as 404; both are rejections, not errors.
pub fn dry_run_outcome(status: StatusCode, body: &str) -> Result<DryRun, EngineError> {
    if status.is_success() {
        return Ok(DryRun::accepted());
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => Ok(DryRun::rejected(error_message(body))),
        _ => Err(classify_failure(status, body)),
    }
}

pub fn classify_failure(status: StatusCode, body: &str) -> EngineError {
    let message = format!("HTTP {}: {}", status.as_u16(), error_message(body));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        EngineError::Transient(message)
    } else {
        EngineError::Permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVALID_QUERY: &str = r#"{
      "error": {
        "code": 400,
        "message": "Unrecognized name: A1x at [12:7]",
        "errors": [{"message": "Unrecognized name: A1x at [12:7]", "reason": "invalidQuery"}],
        "status": "INVALID_ARGUMENT"
      }
    }"#;

    #[test]
    fn table_references_must_be_fully_qualified() {
        let table = TableRef::parse("`eavs-392800.eavs_analytics.reg_union`").expect("parse");
        assert_eq!(table.project, "eavs-392800");
        assert_eq!(table.dataset, "eavs_analytics");
        assert_eq!(table.table, "reg_union");
        assert!(TableRef::parse("eavs_analytics.reg_union").is_err());
        assert!(TableRef::parse("a..c").is_err());
    }

    #[test]
    fn invalid_query_is_a_rejection_with_the_engine_message() {
        let outcome = dry_run_outcome(StatusCode::BAD_REQUEST, INVALID_QUERY).expect("outcome");
        assert!(!outcome.ok);
        assert_eq!(outcome.diagnostic, "Unrecognized name: A1x at [12:7]");
    }

    #[test]
    fn missing_table_is_a_rejection() {
        let body = r#"{"error":{"code":404,"message":"Not found: Table p:eavs_2030.t was not found in location US"}}"#;
        let outcome = dry_run_outcome(StatusCode::NOT_FOUND, body).expect("outcome");
        assert!(!outcome.ok);
        assert!(outcome.diagnostic.starts_with("Not found: Table"));
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_failure(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_failure(StatusCode::FORBIDDEN, "").is_transient());
        assert!(dry_run_outcome(StatusCode::BAD_GATEWAY, "oops").is_err());
    }

    #[test]
    fn non_json_bodies_are_passed_through() {
        assert_eq!(error_message("  upstream timeout \n"), "upstream timeout");
        let err = classify_failure(StatusCode::UNAUTHORIZED, "Request had invalid credentials");
        assert_eq!(
            err,
            EngineError::Permanent("HTTP 401: Request had invalid credentials".to_string())
        );
    }

    #[test]
    fn urls_are_built_from_the_base() {
        let engine = BigQueryEngine::new(
            "proj",
            "token",
            Some("http://localhost:9050/bigquery/v2/"),
            Duration::from_secs(5),
        )
        .expect("engine");
        assert_eq!(engine.jobs_url(), "http://localhost:9050/bigquery/v2/projects/proj/jobs");
        let table = TableRef::parse("p.d.v").expect("table");
        assert_eq!(
            engine.table_url(&table),
            "http://localhost:9050/bigquery/v2/projects/p/datasets/d/tables/v"
        );
    }
}
