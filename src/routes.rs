use std::sync::Arc;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use validator::Validate;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::report::ReportRenderer;
use crate::repo::Repo;
use crate::storage::{upload_key, BlobStore};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(err.to_string()).into()
    }));
    cfg.service(
        web::scope("/api/v1")
            // registered before /{id} so "upload" is never parsed as an id
            .service(web::resource("/job-requests/upload").route(web::post().to(upload_file)))
            .service(
                web::resource("/job-requests")
                    .route(web::get().to(list_job_requests))
                    .route(web::post().to(create_job_request)),
            )
            .service(
                web::resource("/job-requests/{id}")
                    .route(web::get().to(get_job_request))
                    .route(web::patch().to(update_job_request))
                    .route(web::delete().to(delete_job_request)),
            )
            .service(web::resource("/job-requests/{id}/report").route(web::get().to(job_request_report)))
            .service(
                web::resource("/job-requests/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/job-requests/{id}/comments/{comment_id}")
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/members/me").route(web::put().to(register_member))),
    );
    cfg.route("/health", web::get().to(health));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub blob_store: Arc<dyn BlobStore>,
    pub renderer: Arc<ReportRenderer>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

fn success() -> HttpResponse {
    HttpResponse::Ok().json(SuccessResponse { success: true })
}

/// Caller's member id, or `None` when the subject has no member row.
/// A failed lookup is logged and treated as unresolved.
async fn resolve_creator(repo: &dyn Repo, auth: &Auth) -> Option<Id> {
    match repo.resolve_member(auth.subject()).await {
        Ok(member) => member,
        Err(e) => {
            log::warn!("member lookup failed for '{}': {e}", auth.subject());
            None
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/job-requests",
    params(JobRequestFilter),
    responses(
        (status = 200, description = "Job requests, newest first", body = [JobRequest]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_job_requests(
    _auth: Auth,
    data: web::Data<AppState>,
    filter: web::Query<JobRequestFilter>,
) -> Result<HttpResponse, ApiError> {
    let mut requests = data.repo.list_job_requests().await
        .map_err(ApiError::store("Failed to fetch job requests"))?;
    requests.retain(|r| filter.matches(r));
    Ok(HttpResponse::Ok().json(requests))
}

#[utoipa::path(
    get,
    path = "/api/v1/job-requests/{id}",
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 200, description = "Job request", body = JobRequest),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_job_request(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let rec = data.repo.get_job_request(path.into_inner()).await
        .map_err(ApiError::store("Failed to fetch job request"))?;
    Ok(HttpResponse::Ok().json(rec))
}

#[utoipa::path(
    post,
    path = "/api/v1/job-requests",
    request_body = NewJobRequest,
    responses(
        (status = 201, description = "Job request created", body = JobRequest),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_job_request(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewJobRequest>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    new.validate()?;
    let created_by = resolve_creator(data.repo.as_ref(), &auth).await;
    let rec = data.repo.create_job_request(new, created_by).await
        .map_err(ApiError::store("Failed to create job request"))?;
    tracing::info!(id = rec.id, request_number = %rec.request_number, "job request created");
    Ok(HttpResponse::Created().json(rec))
}

#[utoipa::path(
    patch,
    path = "/api/v1/job-requests/{id}",
    request_body = UpdateJobRequest,
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 200, description = "Job request updated", body = JobRequest),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_job_request(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateJobRequest>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    upd.validate()?;
    upd.check_quantity().map_err(ApiError::BadRequest)?;
    let rec = data.repo.update_job_request(path.into_inner(), upd).await
        .map_err(ApiError::store("Failed to update job request"))?;
    Ok(HttpResponse::Ok().json(rec))
}

#[utoipa::path(
    delete,
    path = "/api/v1/job-requests/{id}",
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 200, description = "Deleted together with its comments", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_job_request(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.delete_job_request(id).await
        .map_err(ApiError::store("Failed to delete job request"))?;
    tracing::info!(id, "job request deleted");
    Ok(success())
}

#[utoipa::path(
    get,
    path = "/api/v1/job-requests/{id}/report",
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 200, description = "PDF report (application/pdf attachment)"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    )
)]
pub async fn job_request_report(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let rec = data.repo.get_job_request(path.into_inner()).await
        .map_err(ApiError::store("Failed to fetch job request"))?;
    let report = data.renderer.render(&rec).await.map_err(|e| {
        log::error!("report rendering failed for job request {}: {e}", rec.id);
        ApiError::Internal("Failed to generate PDF")
    })?;
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(report.file_name)],
        })
        .body(report.bytes))
}

#[utoipa::path(
    get,
    path = "/api/v1/job-requests/{id}/comments",
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 200, description = "Comments, newest first", body = [JobRequestComment]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_comments(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(path.into_inner()).await
        .map_err(ApiError::store("Failed to fetch comments"))?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/job-requests/{id}/comments",
    request_body = CommentBody,
    params(("id" = Id, Path, description = "Job request id")),
    responses(
        (status = 201, description = "Comment created", body = JobRequestComment),
        (status = 400, description = "Empty comment"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job request not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentBody>,
) -> Result<HttpResponse, ApiError> {
    let body = payload.into_inner();
    body.validate()?;
    let author_name = body
        .author_name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| auth.display_name().map(str::to_string))
        .unwrap_or_else(|| "Anonymous".to_string());
    let created_by = resolve_creator(data.repo.as_ref(), &auth).await;
    let comment = data.repo.create_comment(NewComment {
        job_request_id: path.into_inner(),
        comment: body.comment,
        author_name,
        created_by,
    }).await.map_err(ApiError::store("Failed to create comment"))?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/v1/job-requests/{id}/comments/{comment_id}",
    params(
        ("id" = Id, Path, description = "Job request id"),
        ("comment_id" = Id, Path, description = "Comment id")
    ),
    responses(
        (status = 200, description = "Comment deleted", body = SuccessResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_comment(_auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, Id)>) -> Result<HttpResponse, ApiError> {
    let (job_request_id, comment_id) = path.into_inner();
    data.repo.delete_comment(job_request_id, comment_id).await
        .map_err(ApiError::store("Failed to delete comment"))?;
    Ok(success())
}

#[derive(Debug, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub path: String,
}

pub const UPLOAD_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[utoipa::path(
    post,
    path = "/api/v1/job-requests/upload",
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "No file provided"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_file(_auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::BadRequest("Malformed multipart body".into())
    })? {
        if field.content_disposition().get_name() != Some("file") { continue; }
        let filename = field.content_disposition().get_filename().unwrap_or("upload").to_string();
        let declared = field
            .content_type()
            .map(|m| m.to_string())
            .filter(|m| m != "application/octet-stream");

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::BadRequest("Malformed multipart body".into())
        })? {
            if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT { return Err(ApiError::PayloadTooLarge); }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() { return Err(ApiError::BadRequest("No file provided".into())); }

        let content_type = declared
            .or_else(|| infer::get(&bytes).map(|t| t.mime_type().to_string()))
            .unwrap_or_else(|| "application/octet-stream".into());
        let key = upload_key(&filename, &bytes);
        let url = data.blob_store.put(&key, &content_type, bytes).await.map_err(|e| {
            log::error!("blob store put failed key={key}: {e}");
            ApiError::Internal("Failed to upload file")
        })?;
        tracing::info!(%key, %content_type, "file uploaded");
        return Ok(HttpResponse::Ok().json(UploadResponse { url, filename, path: key }));
    }
    Err(ApiError::BadRequest("No file provided".into()))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct RegisterMember {
    pub display_name: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/v1/members/me",
    request_body = RegisterMember,
    responses(
        (status = 200, description = "Caller registered as a member", body = Member),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn register_member(
    auth: Auth,
    data: web::Data<AppState>,
    payload: Option<web::Json<RegisterMember>>,
) -> Result<HttpResponse, ApiError> {
    let requested = payload.and_then(|p| p.into_inner().display_name);
    let display_name = requested.as_deref().or(auth.display_name());
    let member = data.repo.upsert_member(auth.subject(), display_name).await
        .map_err(ApiError::store("Failed to register member"))?;
    Ok(HttpResponse::Ok().json(member))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
