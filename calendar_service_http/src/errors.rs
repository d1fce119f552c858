use anyhow::Error as AnyhowError;
use axum::{
    http::{StatusCode, header::InvalidHeaderName},
    response::{IntoResponse, Response},
};
use log::error;
use serde_json::Error as SerdeJsonError;
use serde_yml::Error as SerdeYamlError;
use stack_string::StackString;
use std::{fmt::Debug, net::AddrParseError};
use thiserror::Error;
use utoipa::{
    IntoResponses, PartialSchema,
    openapi::{
        content::ContentBuilder,
        response::{ResponseBuilder, ResponsesBuilder},
    },
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("AddrParseError {0}")]
    AddrParseError(#[from] AddrParseError),
    #[error("SerdeYamlError {0}")]
    SerdeYamlError(#[from] SerdeYamlError),
    #[error("SerdeJsonError {0}")]
    SerdeJsonError(#[from] SerdeJsonError),
    #[error("InvalidHeaderName {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),
    #[error("Internal Server Error: {0}")]
    InternalServerError(StackString),
    #[error("BadRequest: {0}")]
    BadRequest(StackString),
    #[error("Unauthorized: {0}")]
    Unauthorized(StackString),
    #[error("Anyhow error {0}")]
    AnyhowError(#[from] AnyhowError),
    #[error("io Error {0}")]
    IoError(#[from] std::io::Error),
}

impl ServiceError {
    /// Log `cause` and produce a 500 whose body is only `message`.
    pub fn internal(message: &str, cause: impl Debug) -> Self {
        error!("{message}: {cause:?}");
        Self::InternalServerError(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Self::BadRequest(s) | Self::Unauthorized(s) | Self::InternalServerError(s) => {
                (status, s.to_string()).into_response()
            }
            e => {
                error!("{e}");
                (status, "Internal Server Error").into_response()
            }
        }
    }
}

impl IntoResponses for ServiceError {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        let text_content = ContentBuilder::new().schema(Some(String::schema())).build();
        ResponsesBuilder::new()
            .response(
                StatusCode::UNAUTHORIZED.as_str(),
                ResponseBuilder::new()
                    .description("Not Authorized")
                    .content("text/plain", text_content.clone()),
            )
            .response(
                StatusCode::BAD_REQUEST.as_str(),
                ResponseBuilder::new()
                    .description("Bad Request")
                    .content("text/plain", text_content.clone()),
            )
            .response(
                StatusCode::INTERNAL_SERVER_ERROR.as_str(),
                ResponseBuilder::new()
                    .description("Internal Server Error")
                    .content("text/plain", text_content),
            )
            .build()
            .into()
    }
}
