use actix_web::{web, HttpResponse, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::interface::InterfaceInfo;
use crate::models::request::CaptureRequest;
use crate::tasks::coordinator::{ResultLookup, TaskCoordinator};
use crate::utils::error::AppError;

/// `?taskId=` query of the status and result endpoints
#[derive(Deserialize)]
pub struct TaskQuery {
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// Response for listing interfaces
#[derive(Serialize)]
struct InterfacesResponse {
    interfaces: Vec<InterfaceInfo>,
    /// Interface used when a request names none
    default: Option<String>,
}

fn not_found(task_id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({
        "status": "not_found",
        "error": format!("No task with id {}", task_id)
    }))
}

/// Accept a capture request and return its task id without waiting
pub async fn start_capture(
    coordinator: web::Data<TaskCoordinator>,
    request: web::Json<CaptureRequest>,
) -> impl Responder {
    match coordinator.submit(request.into_inner()) {
        Ok((task_id, _handle)) => {
            info!("Accepted capture task {}", task_id);
            HttpResponse::Ok().json(json!({
                "taskId": task_id,
                "status": "pending"
            }))
        }
        Err(e @ AppError::InvalidRequest(_)) => {
            warn!("Rejected capture request: {}", e);
            HttpResponse::BadRequest().json(json!({
                "status": "error",
                "error": e.to_string()
            }))
        }
        Err(e) => {
            error!("Failed to submit capture task: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "status": "error",
                "error": e.to_string()
            }))
        }
    }
}

/// State, progress and error of a task
pub async fn get_capture_status(
    coordinator: web::Data<TaskCoordinator>,
    query: web::Query<TaskQuery>,
) -> impl Responder {
    match coordinator.status(&query.task_id) {
        Some(status) => HttpResponse::Ok().json(status),
        None => not_found(&query.task_id),
    }
}

/// Result of a finished task; never partial data
pub async fn get_capture_result(
    coordinator: web::Data<TaskCoordinator>,
    query: web::Query<TaskQuery>,
) -> impl Responder {
    match coordinator.result(&query.task_id) {
        ResultLookup::Ready(result) => HttpResponse::Ok().json(json!({
            "status": "done",
            "result": result
        })),
        ResultLookup::NotReady { state, error } => HttpResponse::Conflict().json(json!({
            "status": state,
            "error": error.unwrap_or_else(|| format!("Task is still {}, no result yet", state))
        })),
        ResultLookup::NotFound => not_found(&query.task_id),
    }
}

/// List capturable interfaces and the default choice
pub async fn list_interfaces(coordinator: web::Data<TaskCoordinator>) -> impl Responder {
    let catalog = coordinator.interfaces().clone();
    let listed = web::block(move || {
        let interfaces = catalog.list();
        let default = crate::capture::interfaces::pick_default(&interfaces).map(|i| i.name);
        (interfaces, default)
    })
    .await;

    match listed {
        Ok((interfaces, default)) => HttpResponse::Ok().json(InterfacesResponse { interfaces, default }),
        Err(e) => {
            error!("Interface listing failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "status": "error",
                "error": "interface listing failed"
            }))
        }
    }
}
