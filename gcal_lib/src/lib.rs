#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod datetimetype;
pub mod gcal_instance;
pub mod oauth;

use anyhow::{Error, format_err};
use log::debug;
use reqwest::Response;
use serde::de::DeserializeOwned;

/// Read a google api response, turning non-2xx statuses into an error that
/// carries the response body.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: Response,
    context: &str,
) -> Result<T, Error> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(format_err!("{context} failed ({status}): {body}"));
    }
    debug!("{context} {status}");
    serde_json::from_str(&body).map_err(|e| format_err!("{context} invalid response: {e}"))
}
