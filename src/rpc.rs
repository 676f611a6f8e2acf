use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SyncError;

pub type Params = BTreeMap<String, Value>;

const MISSING_FUNCTION_CODES: [&str; 2] = ["PGRST202", "42883"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn is_missing_function(&self) -> bool {
        if let Some(code) = self.code.as_deref() {
            if MISSING_FUNCTION_CODES.contains(&code) {
                return true;
            }
        }
        let message = self.message.to_ascii_lowercase();
        (message.contains("function") && message.contains("does not exist"))
            || message.contains("could not find the function")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    data: Option<Vec<Value>>,
    error: Option<RemoteError>,
}

impl ResultEnvelope {
    pub fn success(rows: Vec<Value>) -> Self {
        Self {
            data: Some(rows),
            error: None,
        }
    }

    pub fn failure(error: RemoteError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn from_payload(payload: Value) -> Self {
        match payload {
            Value::Array(rows) => Self::success(rows),
            Value::Null => Self::success(Vec::new()),
            other => Self::success(vec![other]),
        }
    }

    pub fn data(&self) -> Option<&[Value]> {
        self.data.as_deref()
    }

    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait RemoteProcedure: Send + Sync {
    async fn invoke(&self, schema: &str, procedure: &str, params: &Params) -> ResultEnvelope;
}

#[derive(Clone)]
pub struct RpcHttpClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RpcHttpClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("perfboard/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::RpcSetup(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::RpcSetup(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn procedure_url(&self, procedure: &str) -> String {
        format!("{}/rest/v1/rpc/{procedure}", self.endpoint)
    }
}

#[async_trait]
impl RemoteProcedure for RpcHttpClient {
    async fn invoke(&self, schema: &str, procedure: &str, params: &Params) -> ResultEnvelope {
        let url = self.procedure_url(procedure);
        debug!(%url, schema, "invoking remote procedure");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Profile", schema)
            .header("Accept-Profile", schema)
            .json(params);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(&err),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return transport_failure(&err),
        };

        if !status.is_success() {
            return ResultEnvelope::failure(error_from_body(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return ResultEnvelope::success(Vec::new());
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => ResultEnvelope::from_payload(payload),
            Err(err) => ResultEnvelope::failure(RemoteError::with_code(
                format!("invalid JSON from {procedure}: {err}"),
                "decode",
            )),
        }
    }
}

fn transport_failure(err: &reqwest::Error) -> ResultEnvelope {
    ResultEnvelope::failure(RemoteError::with_code(err.to_string(), "transport"))
}

pub fn error_from_body(status: u16, body: &str) -> RemoteError {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let message = map
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let code = map.get("code").and_then(|v| match v {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        });
        if let Some(message) = message {
            return RemoteError { message, code };
        }
    }
    let message = if body.trim().is_empty() {
        format!("remote procedure returned status {status}")
    } else {
        body.trim().to_string()
    };
    RemoteError::with_code(message, status.to_string())
}

#[derive(Clone)]
pub struct FetchExecutor {
    remote: Arc<dyn RemoteProcedure>,
    schema: String,
    fallback_schema: Option<String>,
}

impl FetchExecutor {
    pub fn new(remote: Arc<dyn RemoteProcedure>, schema: impl Into<String>) -> Self {
        Self {
            remote,
            schema: schema.into(),
            fallback_schema: None,
        }
    }

    pub fn with_fallback_schema(mut self, schema: impl Into<String>) -> Self {
        self.fallback_schema = Some(schema.into());
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn execute(&self, procedure: &str, params: &Params) -> ResultEnvelope {
        let envelope = self.remote.invoke(&self.schema, procedure, params).await;
        let Some(fallback) = self.fallback_schema.as_deref() else {
            return envelope;
        };
        match envelope.error() {
            Some(error) if error.is_missing_function() && fallback != self.schema => {
                warn!(
                    procedure,
                    schema = %self.schema,
                    fallback,
                    "procedure missing in primary schema, retrying fallback"
                );
                self.remote.invoke(fallback, procedure, params).await
            }
            _ => envelope,
        }
    }
}
