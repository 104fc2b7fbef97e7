// SPDX-License-Identifier: MIT
//! HTTP adapter for [`PortalSession`].
//!
//! A cookie-jar reqwest client standing in for a full browser driver: GET
//! for calendar pages, HEAD for heartbeats, GET on the bare base URL to
//! establish a session. Captcha images are lifted out of the gate page's
//! inline CSS (`background: url('data:image/jpg;base64,…')`).

use async_trait::async_trait;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{BotError, Result};
use crate::portal::PortalSession;
use crate::targets::MonthTarget;

/// Data-URL blob inside a style attribute.
static CAPTCHA_DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(['"]?data:image/[^;]+;base64,([A-Za-z0-9+/=]+)['"]?\)"#).unwrap());

pub struct HttpPortal {
    client: reqwest::Client,
    /// Base URL with `request_locale=en` applied.
    base_url: String,
}

impl HttpPortal {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    /// Base URL stripped of any `dateStr` parameter.
    fn base_clean(&self) -> &str {
        self.base_url
            .split("&dateStr=")
            .next()
            .unwrap_or(&self.base_url)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        let text = resp.text().await?;
        Ok(text)
    }
}

/// Force the English locale so text heuristics and phrase matching see a
/// known language.
fn normalize_base_url(url: &str) -> String {
    if url.contains("request_locale") {
        return url.to_string();
    }
    let separator = if url.contains('?') { "&" } else { "?" };
    format!("{url}{separator}request_locale=en")
}

#[async_trait]
impl PortalSession for HttpPortal {
    async fn fetch_month_page(&self, target: &MonthTarget) -> Result<String> {
        let url = format!("{}&dateStr={}", self.base_clean(), target.date_str);
        debug!(month_offset = target.offset, date = %target.date_str, "fetching month page");
        self.get_text(&url).await
    }

    async fn submit_heartbeat(&self) -> Result<()> {
        self.client.head(self.base_clean()).send().await?;
        Ok(())
    }

    async fn perform_login(&self) -> Result<String> {
        debug!("establishing fresh portal session");
        self.get_text(self.base_clean()).await
    }

    fn extract_captcha_image(&self, page: &str) -> Result<Vec<u8>> {
        let captured = CAPTCHA_DATA_URL
            .captures(page)
            .and_then(|c| c.get(1))
            .ok_or(BotError::CaptchaRejected)?;
        let mut data = captured.as_str().to_string();
        // The portal occasionally drops padding from the blob.
        let rem = data.len() % 4;
        if rem != 0 {
            data.push_str(&"=".repeat(4 - rem));
        }
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|_| BotError::CaptchaRejected)
    }

    async fn submit_captcha(&self, answer: &str) -> Result<String> {
        let url = format!("{}&captchaText={}", self.base_clean(), answer);
        debug!("submitting captcha answer");
        self.get_text(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_is_appended_once() {
        assert_eq!(
            normalize_base_url("https://portal.example/extern/appointment_showMonth.do?loc=rome"),
            "https://portal.example/extern/appointment_showMonth.do?loc=rome&request_locale=en"
        );
        let already = "https://portal.example/x?request_locale=en";
        assert_eq!(normalize_base_url(already), already);
    }

    #[test]
    fn captcha_blob_is_extracted_and_padded() {
        let portal = HttpPortal::new("https://portal.example/x", 5).unwrap();
        // "hi!" → aGkh (no padding needed), then a truncated variant.
        let page = r#"<div style="background:white url('data:image/jpg;base64,aGkh')"></div>"#;
        assert_eq!(portal.extract_captcha_image(page).unwrap(), b"hi!");

        let no_blob = "<div>no image here</div>";
        assert!(portal.extract_captcha_image(no_blob).is_err());
    }
}
