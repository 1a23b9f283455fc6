//! reqwest-backed [`HttpExecutor`].
//!
//! Implements the generic HTTP collaborator from stepflow-core. The runner
//! has already resolved templates and decided whether a body is sent; this
//! layer only maps the request onto reqwest and the response back.
//!
//! Response bodies are read chunk by chunk and rejected once they pass
//! `max_response_bytes`.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use stepflow_core::workflow::step_runner::{BoxFuture, HttpExecutor, HttpRequest, HttpResponse, StepError};

const USER_AGENT: &str = concat!("stepflow/", env!("CARGO_PKG_VERSION"));

pub struct ReqwestHttpExecutor {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestHttpExecutor {
    pub fn new(max_response_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_response_bytes,
        })
    }
}

async fn read_body(mut response: reqwest::Response, max_bytes: usize, url: &str) -> Result<String, StepError> {
    let too_large = || StepError::Http(format!("response from '{url}' exceeds {max_bytes} bytes"));

    if response.content_length().is_some_and(|len| len > max_bytes as u64) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StepError::Http(format!("failed to read response body: {e}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

impl HttpExecutor for ReqwestHttpExecutor {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, StepError>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
                .map_err(|_| StepError::Http(format!("invalid HTTP method: {}", request.method)))?;

            let mut builder = self
                .client
                .request(method, &request.url)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = match request.body {
                Some(Value::String(text)) => builder.body(text),
                Some(json) => builder.json(&json),
                None => builder,
            };

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    StepError::Timeout {
                        timeout_ms: request.timeout.as_millis() as u64,
                    }
                } else {
                    StepError::Http(format!("request to '{}' failed: {e}", request.url))
                }
            })?;

            let status = response.status().as_u16();
            let headers: IndexMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("<binary>").to_string()))
                .collect();
            let body = read_body(response, self.max_response_bytes, &request.url).await?;

            tracing::debug!(
                url = request.url.as_str(),
                status,
                body_len = body.len(),
                "HTTP request completed"
            );

            Ok(HttpResponse { status, headers, body })
        })
    }
}
