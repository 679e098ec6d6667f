use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use shared::{ExplainImageRequest, ExplainImageResponse, StatusResponse};

use crate::context::AppContext;
use crate::explain::orchestrator::ExplainError;
use crate::explain::Explainer;
use crate::model::predict::{predict, self_test, PredictError};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Explain(#[from] ExplainError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("Worker pool unavailable")]
    Blocking,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Explain(ExplainError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Explain(ExplainError::InvalidClass(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Explain(ExplainError::Preprocess(_))
            | ApiError::Predict(PredictError::Preprocess(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(_: actix_web::error::BlockingError) -> Self {
        ApiError::Blocking
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, artifact_dir: String) {
    cfg.service(web::resource("/").route(web::get().to(status)))
        .service(web::resource("/predict/").route(web::post().to(handle_predict)))
        .service(web::resource("/explain-image/").route(web::post().to(handle_explain)))
        .service(web::resource("/test/").route(web::get().to(handle_self_test)))
        .service(Files::new("/explanation_images", artifact_dir));
}

async fn status(ctx: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        status: "active".into(),
        model_loaded: true,
        class_labels: ctx.labels.as_slice().to_vec(),
    })
}

async fn handle_predict(
    ctx: web::Data<AppContext>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut field = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Upload(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;

    let is_image = field
        .content_type()
        .map(|mime| mime.type_().as_str() == "image")
        .unwrap_or(false);
    if !is_image {
        return Err(ApiError::BadRequest("File must be an image".into()));
    }
    let filename = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(|name| name.to_string());

    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| ApiError::Upload(e.to_string()))?;
        bytes.extend_from_slice(&data);
    }
    let ctx = ctx.into_inner();
    let response = web::block(move || {
        let response = predict(&ctx, &bytes, filename);
        ctx.lifecycle.sweep_best_effort();
        response
    })
    .await?
    .map_err(|e| {
        error!("Prediction error: {}", e);
        ApiError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(response))
}

async fn handle_explain(
    ctx: web::Data<AppContext>,
    explainer: web::Data<Explainer>,
    request: web::Json<ExplainImageRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    info!(
        "Explanation requested for {} ({})",
        request.request_id, request.image_result.condition
    );
    let ctx = ctx.into_inner();
    let explainer = explainer.into_inner();
    let bundle = web::block(move || {
        let bundle = explainer.explain(&request.request_id, &request.image_result.condition);
        ctx.lifecycle.sweep_best_effort();
        bundle
    })
    .await?
    .map_err(|e| {
        error!("Explanation error: {}", e);
        ApiError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(ExplainImageResponse::from(bundle)))
}

async fn handle_self_test(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    let ctx = ctx.into_inner();
    let report = web::block(move || self_test(&ctx)).await??;
    Ok(HttpResponse::Ok().json(report))
}
