//! MLflow tracking server client (REST API 2.0).

use super::{BEST_VAL_ACCURACY, ExperimentTracker, RunStatus};
use crate::error::MlError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod wire {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Experiment {
        pub experiment_id: String,
        pub name: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct GetExperimentResponse {
        pub experiment: Experiment,
    }

    #[derive(Debug, Deserialize)]
    pub struct CreateExperimentResponse {
        pub experiment_id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Metric {
        pub key: String,
        pub value: f64,
    }

    #[derive(Debug, Deserialize)]
    pub struct RunInfo {
        pub run_id: String,
        pub experiment_id: String,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct RunData {
        #[serde(default)]
        pub metrics: Vec<Metric>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Run {
        pub info: RunInfo,
        #[serde(default)]
        pub data: RunData,
    }

    #[derive(Debug, Deserialize)]
    pub struct CreateRunResponse {
        pub run: Run,
    }

    /// MLflow omits `runs` entirely when the search matches nothing.
    #[derive(Debug, Deserialize)]
    pub struct SearchRunsResponse {
        #[serde(default)]
        pub runs: Vec<Run>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        #[serde(default)]
        pub error_code: String,
        #[serde(default)]
        pub message: String,
    }
}

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: String,
    experiment_id: String,
}

/// Request body for `runs/search`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRunsRequest {
    pub experiment_ids: Vec<String>,
    pub filter: String,
    pub order_by: Vec<String>,
    pub max_results: u32,
}

impl SearchRunsRequest {
    /// Top finished run of `experiment_id` ranked by `metric`, descending.
    pub fn best_finished(experiment_id: &str, metric: &str) -> Self {
        Self {
            experiment_ids: vec![experiment_id.to_string()],
            filter: format!("attributes.status = '{}'", RunStatus::Finished.as_str()),
            order_by: vec![format!("metrics.{metric} DESC")],
            max_results: 1,
        }
    }
}

/// Client for an MLflow tracking server.
#[derive(Debug)]
pub struct MlflowClient {
    base_url: Url,
    http: Client,
    auth: Option<(String, String)>,
    active: Mutex<Option<ActiveRun>>,
}

impl MlflowClient {
    pub fn new(tracking_uri: &str) -> Result<Self, MlError> {
        let base_url = Url::parse(tracking_uri)
            .map_err(|e| MlError::config(format!("invalid tracking URI '{tracking_uri}': {e}")))?;
        Ok(Self {
            base_url,
            http: Client::new(),
            auth: None,
            active: Mutex::new(None),
        })
    }

    pub fn with_basic_auth(mut self, username: String, password: String) -> Self {
        self.auth = Some((username, password));
        self
    }

    pub fn tracking_uri(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn api(&self, endpoint: &str) -> String {
        self.url(&format!("api/2.0/mlflow/{endpoint}"))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    /// Send a request and return the status with the raw body.
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), MlError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    fn map_http_error(endpoint: &str, status: StatusCode, body: &str) -> MlError {
        let detail = serde_json::from_str::<wire::ErrorResponse>(body)
            .map(|e| format!("{}: {}", e.error_code, e.message))
            .unwrap_or_else(|_| body.to_string());
        match status.as_u16() {
            401 | 403 => MlError::tracking(format!("{endpoint}: authentication failed ({status})")),
            _ => MlError::tracking(format!("{endpoint}: HTTP {status}: {detail}")),
        }
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, MlError> {
        debug!(endpoint, "MLflow request");
        let (status, text) = self.send(self.http.post(self.api(endpoint)).json(body)).await?;
        if !status.is_success() {
            return Err(Self::map_http_error(endpoint, status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Look up an experiment id by name; `None` when it does not exist.
    pub async fn experiment_id(&self, name: &str) -> Result<Option<String>, MlError> {
        let endpoint = "experiments/get-by-name";
        let request = self
            .http
            .get(self.api(endpoint))
            .query(&[("experiment_name", name)]);
        let (status, text) = self.send(request).await?;

        if status.is_success() {
            let found: wire::GetExperimentResponse = serde_json::from_str(&text)?;
            debug!(name = %found.experiment.name, id = %found.experiment.experiment_id, "Found experiment");
            return Ok(Some(found.experiment.experiment_id));
        }
        let missing = status == StatusCode::NOT_FOUND
            || serde_json::from_str::<wire::ErrorResponse>(&text)
                .is_ok_and(|e| e.error_code == RESOURCE_DOES_NOT_EXIST);
        if missing {
            return Ok(None);
        }
        Err(Self::map_http_error(endpoint, status, &text))
    }

    async fn get_or_create_experiment(&self, name: &str) -> Result<String, MlError> {
        if let Some(id) = self.experiment_id(name).await? {
            return Ok(id);
        }
        let created: wire::CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        info!(experiment = name, id = %created.experiment_id, "Created MLflow experiment");
        Ok(created.experiment_id)
    }

    async fn active(&self) -> Result<ActiveRun, MlError> {
        self.active
            .lock()
            .await
            .clone()
            .ok_or_else(|| MlError::tracking("no active run"))
    }
}

#[async_trait]
impl ExperimentTracker for MlflowClient {
    async fn start_run(&self, experiment: &str) -> Result<String, MlError> {
        if let Some(run) = self.active.lock().await.as_ref() {
            return Err(MlError::tracking(format!(
                "run {} is still active",
                run.run_id
            )));
        }
        let experiment_id = self.get_or_create_experiment(experiment).await?;
        let created: wire::CreateRunResponse = self
            .post(
                "runs/create",
                &json!({
                    "experiment_id": experiment_id,
                    "start_time": chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        let run_id = created.run.info.run_id;
        *self.active.lock().await = Some(ActiveRun {
            run_id: run_id.clone(),
            experiment_id: created.run.info.experiment_id,
        });
        info!(run_id = %run_id, experiment, "Started MLflow run");
        Ok(run_id)
    }

    async fn end_run(&self, status: RunStatus) -> Result<(), MlError> {
        let run = self.active().await?;
        let _: IgnoredAny = self
            .post(
                "runs/update",
                &json!({
                    "run_id": run.run_id,
                    "status": status.as_str(),
                    "end_time": chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        *self.active.lock().await = None;
        info!(run_id = %run.run_id, status = status.as_str(), "Ended MLflow run");
        Ok(())
    }

    async fn log_metric(&self, key: &str, value: f64, step: Option<u64>) -> Result<(), MlError> {
        let run = self.active().await?;
        let _: IgnoredAny = self
            .post(
                "runs/log-metric",
                &json!({
                    "run_id": run.run_id,
                    "key": key,
                    "value": value,
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                    "step": step.unwrap_or(0),
                }),
            )
            .await?;
        Ok(())
    }

    async fn log_param(&self, key: &str, value: &str) -> Result<(), MlError> {
        let run = self.active().await?;
        let _: IgnoredAny = self
            .post(
                "runs/log-parameter",
                &json!({ "run_id": run.run_id, "key": key, "value": value }),
            )
            .await?;
        Ok(())
    }

    async fn log_artifact(&self, local_path: &Path, artifact_path: &str) -> Result<(), MlError> {
        let run = self.active().await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MlError::invalid_input("artifact path has no file name"))?;
        let bytes = tokio::fs::read(local_path).await?;
        let url = self.url(&format!(
            "api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}/{}",
            run.experiment_id,
            run.run_id,
            artifact_path.trim_matches('/'),
            file_name
        ));
        let (status, text) = self.send(self.http.put(url).body(bytes)).await?;
        if !status.is_success() {
            return Err(Self::map_http_error("mlflow-artifacts", status, &text));
        }
        Ok(())
    }

    async fn get_historical_best(&self, experiment: &str) -> Result<f64, MlError> {
        let Some(experiment_id) = self.experiment_id(experiment).await? else {
            return Ok(0.0);
        };
        let found: wire::SearchRunsResponse = self
            .post(
                "runs/search",
                &SearchRunsRequest::best_finished(&experiment_id, BEST_VAL_ACCURACY),
            )
            .await?;
        let best = found
            .runs
            .first()
            .and_then(|run| {
                run.data
                    .metrics
                    .iter()
                    .find(|m| m.key == BEST_VAL_ACCURACY)
                    .map(|m| m.value)
            })
            .unwrap_or(0.0);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_shape() {
        let request = SearchRunsRequest::best_finished("7", BEST_VAL_ACCURACY);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["experiment_ids"], json!(["7"]));
        assert_eq!(value["order_by"], json!(["metrics.best_val_accuracy DESC"]));
        assert_eq!(value["max_results"], 1);
        assert_eq!(value["filter"], "attributes.status = 'FINISHED'");
    }

    #[test]
    fn test_api_url_joins_cleanly() {
        let client = MlflowClient::new("http://mlflow:5000/").unwrap();
        assert_eq!(
            client.api("runs/search"),
            "http://mlflow:5000/api/2.0/mlflow/runs/search"
        );
    }

    #[test]
    fn test_search_response_without_runs() {
        let parsed: wire::SearchRunsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.runs.is_empty());
    }

    #[test]
    fn test_error_mapping_includes_code() {
        let err = MlflowClient::map_http_error(
            "runs/create",
            StatusCode::BAD_REQUEST,
            r#"{"error_code":"INVALID_PARAMETER_VALUE","message":"bad id"}"#,
        );
        assert!(err.to_string().contains("INVALID_PARAMETER_VALUE: bad id"));
    }

    #[tokio::test]
    async fn test_logging_without_active_run_fails() {
        let client = MlflowClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.log_param("model", "VGG16").await.is_err());
    }
}
