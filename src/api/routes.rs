use actix_web::{web, HttpResponse, Responder};
use serde_json::json;
use crate::api::handlers::capture::{
    get_capture_result,
    get_capture_status,
    list_interfaces,
    start_capture,
};

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "netdiag API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Capture-and-diagnose service for slow websites, cross-carrier links and game lag",
        "endpoints": [
            {
                "path": "/capture",
                "method": "POST",
                "description": "Start a diagnostic capture task"
            },
            {
                "path": "/capture/status?taskId=",
                "method": "GET",
                "description": "Get state and progress of a task"
            },
            {
                "path": "/capture/result?taskId=",
                "method": "GET",
                "description": "Get the summary and diagnosis of a finished task"
            },
            {
                "path": "/capture/interfaces",
                "method": "GET",
                "description": "List capturable network interfaces"
            }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .service(
            web::scope("/capture")
                .route("", web::post().to(start_capture))
                .route("/status", web::get().to(get_capture_status))
                .route("/result", web::get().to(get_capture_result))
                .route("/interfaces", web::get().to(list_interfaces))
        );
}
