// SPDX-License-Identifier: MIT
//! External collaborator seams.
//!
//! The engine never touches the DOM or the OCR model. It consumes three
//! opaque capabilities: a portal session (fetch/heartbeat/login/submit), a
//! captcha solver (image in, text out), and a notifier (see
//! [`crate::notify`]). Integration tests drive the engine through fakes of
//! these traits.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::targets::MonthTarget;

/// One browsing session against the target portal.
///
/// Implementations own transport details (cookies, locale, timeouts). All
/// methods return [`crate::error::BotError::Transient`] for network-level
/// failures so the engine can tell them apart from captcha rejections.
#[async_trait]
pub trait PortalSession: Send + Sync {
    /// Fetch the calendar page for one target month. Returns raw markup.
    async fn fetch_month_page(&self, target: &MonthTarget) -> Result<String>;

    /// Minimal liveness request (HEAD-equivalent) that keeps the server-side
    /// session from expiring. Carries no other semantics.
    async fn submit_heartbeat(&self) -> Result<()>;

    /// Establish a fresh server-side session. Returns the landing page so
    /// the caller can inspect it for gates.
    async fn perform_login(&self) -> Result<String>;

    /// Extract the current captcha challenge image from fetched page markup.
    ///
    /// The portal embeds the image as a base64 data URL in the gate page's
    /// CSS, so no extra request is needed.
    fn extract_captcha_image(&self, page: &str) -> Result<Vec<u8>>;

    /// Submit a solved captcha answer. Returns the resulting page; the
    /// engine classifies it to decide whether the portal accepted the text.
    async fn submit_captcha(&self, answer: &str) -> Result<String>;
}

/// OCR captcha solver.
///
/// The engine never trusts solver confidence — acceptance is judged solely
/// by the portal's response to the submitted text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve a challenge image. `Err(BotError::CaptchaRejected)` when the
    /// solver cannot produce a plausible answer.
    async fn solve(&self, image: &[u8]) -> Result<String>;
}
