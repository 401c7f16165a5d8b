//! Tenant credential middleware.
//!
//! Authenticated routes require `X-Project-ID` and `X-API-Key` (also
//! accepted as `project_id`/`api_key` query parameters). The key comparison
//! is constant-time and the project must be active. On success the project
//! snapshot is bound to the request.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::{queries, AppState};
use crate::models::Project;

/// Authenticated tenant attached to the request extensions.
#[derive(Clone)]
pub struct ProjectContext {
    pub project: Project,
}

pub async fn project_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (project_id, api_key) = extract_credentials(&request);

    let (project_id, api_key) = match (project_id, api_key) {
        (Some(p), Some(k)) if !p.is_empty() && !k.is_empty() => (p, k),
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let project = queries::get_project_by_project_id(&conn, &project_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !constant_time_eq(project.api_key.as_bytes(), api_key.as_bytes()) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !project.is_active {
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(ProjectContext { project });

    Ok(next.run(request).await)
}

fn extract_credentials(request: &Request) -> (Option<String>, Option<String>) {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    let mut project_id = header("X-Project-ID");
    let mut api_key = header("X-API-Key");

    if project_id.is_none() || api_key.is_none() {
        let query: Vec<(String, String)> = request
            .uri()
            .query()
            .map(|q| {
                q.split('&')
                    .filter_map(|pair| {
                        let (k, v) = pair.split_once('=')?;
                        Some((k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (k, v) in query {
            match k.as_str() {
                "project_id" if project_id.is_none() => project_id = Some(v),
                "api_key" if api_key.is_none() => api_key = Some(v),
                _ => {}
            }
        }
    }

    (project_id, api_key)
}

/// Length leaks are fine (key lengths are not secret); the content
/// comparison must not early-out.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
