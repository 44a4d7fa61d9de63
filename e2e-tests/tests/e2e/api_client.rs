use bridge_rs::api::ApiResponse;
use bridge_rs::progress::{ProgressEvent, SseDecoder};
use serde_json::{json, Value};

/// HTTP client for the bridge-server wizard and migration endpoints
pub struct BridgeTestClient {
    http: reqwest::Client,
    base_url: String,
    source_key: String,
    target_key: String,
}

impl BridgeTestClient {
    pub fn new(base_url: &str, source_key: &str, target_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
        }
    }

    fn wizard_url(&self, path: &str) -> String {
        format!(
            "{}/api/wizard/{}/{}{}",
            self.base_url, self.source_key, self.target_key, path
        )
    }

    async fn unwrap_response(response: reqwest::Response) -> Result<Value, String> {
        let status = response.status();
        let body: ApiResponse<Value> = response
            .json()
            .await
            .map_err(|e| format!("Invalid response body: {}", e))?;

        match (body.success, body.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(format!(
                "Request failed ({}): {}",
                status,
                body.error.unwrap_or_default()
            )),
        }
    }

    /// Current wizard state
    pub async fn state(&self) -> Result<Value, String> {
        let response = self
            .http
            .get(self.wizard_url(""))
            .send()
            .await
            .map_err(|e| format!("Failed to fetch wizard: {}", e))?;
        Self::unwrap_response(response).await
    }

    /// POST a wizard action; returns `{state, outcome}`
    pub async fn action(&self, path: &str, body: Option<Value>) -> Result<Value, String> {
        let mut request = self.http.post(self.wizard_url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("Failed to send {}: {}", path, e))?;
        Self::unwrap_response(response).await
    }

    pub async fn complete_phase(&self, phase: u8) -> Result<Value, String> {
        self.action(&format!("/phases/{}/complete", phase), None).await
    }

    pub async fn skip_phase(&self, phase: u8) -> Result<Value, String> {
        self.action(&format!("/phases/{}/skip", phase), None).await
    }

    pub async fn go_to_phase(&self, phase: u8) -> Result<Value, String> {
        self.action(&format!("/goto/{}", phase), None).await
    }

    /// Run one entity migration and collect the streamed events.
    ///
    /// `extra` is merged into the request body (e.g. `resumeIds`,
    /// `category`).
    pub async fn migrate(&self, entity: &str, extra: Value) -> Result<Vec<ProgressEvent>, String> {
        let mut body = json!({
            "sourceKey": self.source_key,
            "targetKey": self.target_key,
            "source": {
                "url": "https://shop.example.com",
                "consumer_key": "ck_test",
                "consumer_secret": "cs_test",
            },
            "target": {"store_hash": self.target_key, "access_token": "test-token"},
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }

        let mut response = self
            .http
            .post(format!("{}/api/migrate/{}", self.base_url, entity))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Failed to start migration: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Migration refused: {}", response.status()));
        }

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("Stream interrupted: {}", e))?
        {
            events.extend(decoder.push(&chunk));
        }
        events.extend(decoder.finish());

        if decoder.malformed() > 0 {
            return Err(format!("{} malformed progress records", decoder.malformed()));
        }
        Ok(events)
    }
}

/// Phase status from a state document
pub fn phase_status(state: &Value, phase: u8) -> String {
    state["phases"][phase.to_string()]["status"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}
