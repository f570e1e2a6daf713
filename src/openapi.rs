use crate::error::ApiErrorBody;
use crate::models::{CommentBody, JobRequest, JobRequestComment, JobStatus, Member, NewJobRequest, UpdateJobRequest};
use crate::routes::{RegisterMember, SuccessResponse, UploadResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_job_requests,
        crate::routes::get_job_request,
        crate::routes::create_job_request,
        crate::routes::update_job_request,
        crate::routes::delete_job_request,
        crate::routes::job_request_report,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::delete_comment,
        crate::routes::upload_file,
        crate::routes::register_member,
    ),
    components(schemas(
        JobRequest, NewJobRequest, UpdateJobRequest, JobStatus,
        JobRequestComment, CommentBody, Member, RegisterMember,
        UploadResponse, SuccessResponse, ApiErrorBody
    )),
    tags(
        (name = "job-requests", description = "Job request tracking"),
    )
)]
pub struct ApiDoc;
