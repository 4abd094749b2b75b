use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::prp::ErrorKind;
use crate::sync::{SyncError, SyncOptions, SyncResult, SyncService};

const FLASH_ERROR_LIMIT: usize = 5;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct SyncRequest {
    /// Re-sync records synced within the last interval
    #[schema(example = false)]
    pub force: bool,
    /// Report what would change without writing
    #[schema(example = false)]
    pub dry_run: bool,
}

impl From<SyncRequest> for SyncOptions {
    fn from(req: SyncRequest) -> Self {
        SyncOptions {
            force: req.force,
            dry_run: req.dry_run,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "message": "PRP sync finished: 1 created, 0 updated, 0 skipped, 0 errors across 1 department(s)",
    "created": 1,
    "updated": 0,
    "skipped": 0,
    "errors": 0,
    "departments": 1,
    "dry_run": false,
    "first_errors": []
}))]
pub struct SyncResponse {
    pub message: String,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub departments: usize,
    pub dry_run: bool,
    pub first_errors: Vec<String>,
}

impl From<&SyncResult> for SyncResponse {
    fn from(result: &SyncResult) -> Self {
        SyncResponse {
            message: result.summary(),
            created: result.created,
            updated: result.updated,
            skipped: result.skipped,
            errors: result.errors,
            departments: result.departments,
            dry_run: result.dry_run,
            first_errors: result.first_errors(FLASH_ERROR_LIMIT),
        }
    }
}

fn sync_response(outcome: Result<SyncResult, SyncError>) -> HttpResponse {
    match outcome {
        Ok(result) => {
            info!(message = %result.summary(), "Admin-triggered sync done");
            HttpResponse::Ok().json(SyncResponse::from(&result))
        }
        Err(e) => {
            error!(error = %e, "Admin-triggered sync failed");
            let body = json!({"message": e.to_string()});
            match &e {
                SyncError::AlreadyRunning => HttpResponse::Conflict().json(body),
                SyncError::NotFound(_) => HttpResponse::NotFound().json(body),
                SyncError::Prp(prp) if prp.kind() != ErrorKind::Config => {
                    HttpResponse::BadGateway().json(body)
                }
                _ => HttpResponse::InternalServerError().json(body),
            }
        }
    }
}

/// Sync all departments
#[utoipa::path(
    post,
    path = "/api/prp/sync",
    request_body(content = SyncRequest, description = "Optional sync flags", content_type = "application/json"),
    responses(
        (status = 200, description = "Sync finished", body = SyncResponse),
        (status = 409, description = "Another sync is running"),
        (status = 502, description = "PRP unreachable or rejected the request")
    ),
    tag = "PRP",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn sync_all(
    auth: AuthUser,
    service: web::Data<SyncService>,
    body: Option<web::Json<SyncRequest>>,
) -> actix_web::Result<impl Responder> {
    auth.require_sync_permission()?;
    let options: SyncOptions = body.map(|b| b.into_inner()).unwrap_or_default().into();

    info!(user = %auth.username, ?options, "Full PRP sync requested");
    Ok(sync_response(service.sync_all(options).await))
}

/// Sync one department
#[utoipa::path(
    post,
    path = "/api/prp/sync/department/{department_id}",
    params(
        ("department_id", Path, description = "PRP department ID")
    ),
    request_body(content = SyncRequest, description = "Optional sync flags", content_type = "application/json"),
    responses(
        (status = 200, description = "Sync finished", body = SyncResponse),
        (status = 404, description = "Department not found in PRP"),
        (status = 409, description = "Another sync is running")
    ),
    tag = "PRP",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn sync_department(
    auth: AuthUser,
    service: web::Data<SyncService>,
    path: web::Path<u64>,
    body: Option<web::Json<SyncRequest>>,
) -> actix_web::Result<impl Responder> {
    auth.require_sync_permission()?;
    let department_id = path.into_inner();
    let options: SyncOptions = body.map(|b| b.into_inner()).unwrap_or_default().into();

    info!(user = %auth.username, department_id, ?options, "Department PRP sync requested");
    Ok(sync_response(
        service.sync_department(department_id, options).await,
    ))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SyncUserQuery {
    /// Only search this PRP department
    pub department_id: Option<u64>,
}

/// Sync one employee
#[utoipa::path(
    post,
    path = "/api/prp/sync/user/{employee_id}",
    params(
        ("employee_id", Path, description = "PRP userId"),
        SyncUserQuery
    ),
    request_body(content = SyncRequest, description = "Optional sync flags", content_type = "application/json"),
    responses(
        (status = 200, description = "Sync finished", body = SyncResponse),
        (status = 404, description = "Employee not found in PRP"),
        (status = 409, description = "Another sync is running")
    ),
    tag = "PRP",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn sync_user(
    auth: AuthUser,
    service: web::Data<SyncService>,
    path: web::Path<String>,
    query: web::Query<SyncUserQuery>,
    body: Option<web::Json<SyncRequest>>,
) -> actix_web::Result<impl Responder> {
    auth.require_sync_permission()?;
    let employee_id = path.into_inner();
    let options: SyncOptions = body.map(|b| b.into_inner()).unwrap_or_default().into();

    info!(user = %auth.username, employee_id = %employee_id, ?options, "Single-user PRP sync requested");
    Ok(sync_response(
        service
            .sync_user(&employee_id, query.department_id, options)
            .await,
    ))
}

/// Check PRP connectivity
#[utoipa::path(
    get,
    path = "/api/prp/status",
    responses(
        (status = 200, description = "PRP reachable and credentials accepted"),
        (status = 502, description = "PRP unreachable or credentials rejected")
    ),
    tag = "PRP",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn status(
    auth: AuthUser,
    service: web::Data<SyncService>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    match service.client().test_connection(None).await {
        Ok(report) => Ok(HttpResponse::Ok().json(json!({
            "connected": true,
            "report": report
        }))),
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "PRP connectivity check failed");
            Ok(HttpResponse::BadGateway().json(json!({
                "connected": false,
                "kind": e.kind().to_string(),
                "message": e.to_string()
            })))
        }
    }
}
