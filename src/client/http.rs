//! reqwest-backed [`LabApi`] implementation.
//!
//! This is the only place that knows the lab's envelope format
//! (`{"code": ..., "content": ...}`) and maps HTTP outcomes to [`LabError`].

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    ArtifactUpload, CODE_OK, Endpoint, LabApi, LabError, LabResult, TriggerResponse,
};
use crate::config::LabConfig;
use crate::model::{RunRequest, TestTask};

const USER_AGENT: &str = concat!("labrun/", env!("CARGO_PKG_VERSION"));

const PACKAGE_MIME: &str = "application/vnd.android.package-archive";

/// HTTP client for a device lab.
#[derive(Debug, Clone)]
pub struct HttpLabClient {
    client: reqwest::Client,
    endpoint: Endpoint,
    lab: LabConfig,
}

impl HttpLabClient {
    /// Creates a client using the endpoint, token and timeouts in `lab`.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Transport`] if the TLS backend cannot be initialised.
    pub fn new(lab: LabConfig) -> LabResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(lab.request_timeout())
            .read_timeout(lab.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| LabError::Transport {
                operation: "create http client",
                source,
            })?;

        Ok(Self {
            client,
            endpoint: Endpoint::from_config(&lab),
            lab,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.lab.auth_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.lab.auth_token)
        }
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> LabResult<Response> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|source| LabError::Transport { operation, source })
    }
}

#[async_trait::async_trait]
impl LabApi for HttpLabClient {
    async fn upload_artifacts(&self, upload: &ArtifactUpload) -> LabResult<String> {
        const OP: &str = "upload artifacts";

        let form = Form::new()
            .text("commitId", upload.commit.id.clone())
            .text("commitCount", upload.commit.count.clone())
            .text("commitMessage", upload.commit.message.clone())
            .text("buildFlavor", upload.build_flavor.clone())
            .part("apkFile", package_part(OP, &upload.app).await?)
            .part("testApkFile", package_part(OP, &upload.test_app).await?);

        let url = self.endpoint.upload_url();
        debug!(url = %url, app = %upload.app.display(), "uploading artifacts");

        let response = self.send(OP, self.client.post(&url).multipart(form)).await?;
        let envelope = read_envelope(OP, response).await?;
        expect_ok(OP, &envelope)?;

        content_string(OP, &envelope, "id")
    }

    async fn trigger_run(&self, request: &RunRequest) -> LabResult<TriggerResponse> {
        const OP: &str = "trigger run";

        let body = trigger_body(request, &self.lab);
        let url = self.endpoint.run_url();
        debug!(url = %url, body = %body, "triggering test run");

        let response = self.send(OP, self.client.post(&url).json(&body)).await?;
        let envelope = read_envelope(OP, response).await?;
        let code = envelope_code(OP, &envelope)?;
        let task_id = content_string(OP, &envelope, "testTaskId").ok();

        Ok(TriggerResponse {
            code,
            task_id,
            body: envelope,
        })
    }

    async fn task_status(&self, task_id: &str) -> LabResult<TestTask> {
        const OP: &str = "get task status";

        let url = self.endpoint.status_url(task_id);
        let response = self.send(OP, self.client.get(&url)).await?;
        let mut envelope = read_envelope(OP, response).await?;
        expect_ok(OP, &envelope)?;

        let content = match envelope.get_mut("content").map(Value::take) {
            Some(content) if !content.is_null() => content,
            _ => {
                return Err(LabError::Malformed {
                    operation: OP,
                    message: "missing content".to_string(),
                });
            }
        };

        serde_json::from_value(content).map_err(|e| LabError::Malformed {
            operation: OP,
            message: e.to_string(),
        })
    }

    async fn fetch_artifact(&self, url: &str) -> LabResult<Option<Vec<u8>>> {
        const OP: &str = "download artifact";

        // Blob URLs are pre-signed; the bearer token is not sent to them.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| LabError::Transport {
                operation: OP,
                source,
            })?;

        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "artifact not available");
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| LabError::Transport {
                operation: OP,
                source,
            })?;

        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes.to_vec()))
        }
    }
}

/// Builds the JSON body of a trigger request.
///
/// Extra args are merged as top-level string fields after the fixed fields,
/// so they can override them.
pub fn trigger_body(request: &RunRequest, lab: &LabConfig) -> Value {
    let mut body = Map::new();
    body.insert("testSuiteClass".into(), Value::from(request.suite.clone()));
    body.insert("testTimeOutSec".into(), Value::from(request.timeout_secs));
    body.insert("pkgName".into(), Value::from(lab.pkg_name.clone()));
    body.insert("testPkgName".into(), Value::from(lab.test_pkg_name.clone()));
    body.insert(
        "apkSetId".into(),
        Value::from(request.artifact_set_id.clone()),
    );
    body.insert(
        "groupTestType".into(),
        Value::from(lab.group_test_type.clone()),
    );
    body.insert(
        "pipelineLink".into(),
        Value::from(lab.pipeline_link.clone().unwrap_or_default()),
    );
    body.insert("runningType".into(), Value::from(lab.running_type.clone()));
    body.insert(
        "frameworkType".into(),
        Value::from(lab.framework_type.clone()),
    );

    if let Some(audience) = &request.audience {
        body.insert("reportAudience".into(), Value::from(audience.clone()));
    }
    if let Some(device) = &request.device {
        body.insert("deviceIdentifier".into(), Value::from(device.clone()));
    }

    let instrumentation: Map<String, Value> = request
        .instrumentation_args
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
        .collect();
    body.insert("instrumentationArgs".into(), Value::Object(instrumentation));

    for (key, value) in &request.extra_args {
        body.insert(key.clone(), Value::from(value.clone()));
    }

    Value::Object(body)
}

async fn package_part(operation: &'static str, path: &std::path::Path) -> LabResult<Part> {
    let bytes = tokio::fs::read(path).await.map_err(|source| LabError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    with_mime(operation, Part::bytes(bytes).file_name(file_name), PACKAGE_MIME)
}

fn with_mime(operation: &'static str, part: Part, mime: &str) -> LabResult<Part> {
    part.mime_str(mime).map_err(|e| LabError::Malformed {
        operation,
        message: format!("invalid content type \"{}\": {}", mime, e),
    })
}

async fn read_envelope(operation: &'static str, response: Response) -> LabResult<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| LabError::Transport { operation, source })?;

    if !status.is_success() {
        return Err(LabError::HttpStatus {
            operation,
            status: status.as_u16(),
            body: text,
        });
    }

    if text.trim().is_empty() {
        return Err(LabError::EmptyBody { operation });
    }

    serde_json::from_str(&text).map_err(|e| LabError::Malformed {
        operation,
        message: e.to_string(),
    })
}

fn envelope_code(operation: &'static str, envelope: &Value) -> LabResult<i64> {
    envelope
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| LabError::Malformed {
            operation,
            message: "missing numeric \"code\"".to_string(),
        })
}

fn expect_ok(operation: &'static str, envelope: &Value) -> LabResult<()> {
    let code = envelope_code(operation, envelope)?;
    if code == CODE_OK {
        Ok(())
    } else {
        Err(LabError::ServerCode {
            operation,
            code,
            body: envelope.to_string(),
        })
    }
}

/// Reads `content.<field>` as a string; numeric ids are accepted too.
fn content_string(operation: &'static str, envelope: &Value, field: &str) -> LabResult<String> {
    match envelope.get("content").and_then(|c| c.get(field)) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(LabError::Malformed {
            operation,
            message: format!("missing content.{}", field),
        }),
    }
}
