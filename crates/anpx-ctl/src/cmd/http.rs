//! Shared HTTP request helper for CLI commands.

use anyhow::{Context, Result};
use serde::Deserialize;

pub fn base_url(addr: &str) -> String {
    format!("http://{}", addr)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to anpx-gateway at {} — is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}
