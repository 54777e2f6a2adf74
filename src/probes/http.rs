use super::{Probe, ProbeResult, TestDefinition};
use chrono::Utc;
use reqwest::{Client, Method};
use std::time::{Duration, Instant};

/// HTTP probe: issues the request a test describes and records the status.
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("apimonitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    fn request(&self, test: &TestDefinition) -> Result<reqwest::RequestBuilder, String> {
        let method = Method::from_bytes(test.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method {:?}", test.method))?;

        let mut req = self.client.request(method, &test.url);
        for (name, value) in &test.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &test.body {
            req = req.body(body.clone());
        }
        Ok(req)
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn run(&self, test: &TestDefinition) -> ProbeResult {
        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match self.request(test) {
            Ok(req) => req.send().await.map_err(|e| describe(&e, self.timeout)),
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        // Body is never read: only the status line matters.
        let (status, error) = match outcome {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let error = (code != 200).then(|| format!("unexpected status code {}", code));
                (Some(code), error)
            }
            Err(e) => (None, Some(e)),
        };

        ProbeResult {
            test_id: test.id.clone(),
            timestamp,
            status,
            error,
            duration_ms,
        }
    }
}

/// Flatten a reqwest error and its source chain into one line.
fn describe(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        return format!("request timed out after {}s", timeout.as_secs());
    }
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
