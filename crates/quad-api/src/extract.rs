//! `Json` and `Query` wrappers whose rejections go through `ApiError`, so a
//! malformed body or query string gets the same JSON error shape as every
//! other refusal.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use tracing::debug;

use quad_db::ChatError;

use crate::error::ApiError;

pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_rejected(rejection)),
        }
    }
}

pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejected(rejection)),
        }
    }
}

fn body_rejected(rejection: JsonRejection) -> ApiError {
    debug!(status = %rejection.status(), "request body rejected");
    ChatError::validation("body", rejection.body_text()).into()
}

fn query_rejected(rejection: QueryRejection) -> ApiError {
    debug!(status = %rejection.status(), "query string rejected");
    ChatError::validation("query", rejection.body_text()).into()
}
