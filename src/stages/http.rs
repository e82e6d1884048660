//! HTTP stage: lowercased header map plus security-header convenience fields.
//!
//! Unlike the subprocess-driven stages, this one goes through `reqwest`
//! directly — header fingerprinting doesn't need a shell-out, and the
//! crate already depends on `reqwest` for the web-discovery and
//! subdomain-scraping stages.

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::Stage;

pub struct HttpStage {
    client: reqwest::Client,
}

impl Default for HttpStage {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl Stage for HttpStage {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, _runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let url = target.to_url();

        let response = match tokio::time::timeout(timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return StageResult::error("http request failed"),
            Err(_) => return StageResult::error("http request timed out"),
        };

        let headers = response.headers();
        let lower_headers: std::collections::BTreeMap<String, String> = headers
            .iter()
            .map(|(name, value)| (name.as_str().to_lowercase(), value.to_str().unwrap_or_default().to_string()))
            .collect();

        let server = lower_headers.get("server").cloned();
        let powered_by = lower_headers.get("x-powered-by").cloned();

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("statusCode".to_string(), json!(response.status().as_u16()));
        fields.insert("headers".to_string(), json!(lower_headers));
        fields.insert("server".to_string(), json!(server));
        fields.insert("poweredBy".to_string(), json!(powered_by));
        fields.insert("hsts".to_string(), json!(lower_headers.contains_key("strict-transport-security")));
        fields.insert("csp".to_string(), json!(lower_headers.get("content-security-policy")));
        fields.insert("xFrameOptions".to_string(), json!(lower_headers.get("x-frame-options")));
        fields.insert("xContentTypeOptions".to_string(), json!(lower_headers.get("x-content-type-options")));
        fields.insert("xXssProtection".to_string(), json!(lower_headers.get("x-xss-protection")));
        fields.insert("referrerPolicy".to_string(), json!(lower_headers.get("referrer-policy")));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_builds_without_panicking() {
        let _stage = HttpStage::default();
    }
}
