// SPDX-License-Identifier: MIT
//! HTTP adapter for the OCR captcha solver.
//!
//! Posts the challenge image (base64) to an image-to-text task endpoint and
//! returns the recognized text. The engine never treats the recognized text
//! as correct — only the portal's acceptance decides that.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use crate::portal::CaptchaSolver;

pub struct HttpOcrSolver {
    client: reqwest::Client,
    api_url: String,
    client_key: String,
}

impl HttpOcrSolver {
    pub fn new(api_url: String, client_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::Config(format!("ocr client: {e}")))?;
        Ok(Self {
            client,
            api_url,
            client_key,
        })
    }
}

#[async_trait]
impl CaptchaSolver for HttpOcrSolver {
    async fn solve(&self, image: &[u8]) -> Result<String> {
        let payload = json!({
            "clientKey": self.client_key,
            "task": {
                "type": "ImageToTextTask",
                "module": "common",
                "body": base64::engine::general_purpose::STANDARD.encode(image),
            }
        });

        let resp = self.client.post(&self.api_url).json(&payload).send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "ocr endpoint returned an error status");
            return Err(BotError::CaptchaRejected);
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|_| BotError::CaptchaRejected)?;

        if body.get("errorId").and_then(|v| v.as_i64()).unwrap_or(0) != 0 {
            warn!(
                code = body.get("errorCode").and_then(|v| v.as_str()).unwrap_or("unknown"),
                "ocr endpoint rejected the task"
            );
            return Err(BotError::CaptchaRejected);
        }

        let text = body
            .pointer("/solution/text")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(BotError::CaptchaRejected)?;
        debug!(len = text.len(), "ocr produced an answer");
        Ok(text)
    }
}
