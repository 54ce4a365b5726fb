//! The export routes: `POST /` and `POST /{filename}`.

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use common::{ExportArtifact, OutputType};

use crate::body::{build_job, parse_payload, ResponseShape};
use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

pub async fn export_root(State(state): State<GatewayState>, req: Request) -> ApiResult<Response> {
    run_export(state, None, req).await
}

pub async fn export_named(
    State(state): State<GatewayState>,
    Path(filename): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    run_export(state, Some(filename), req).await
}

async fn run_export(
    state: GatewayState,
    path_filename: Option<String>,
    req: Request,
) -> ApiResult<Response> {
    let request_id = Uuid::new_v4().to_string();
    let payload = parse_payload(req, state.config.server.max_body_size).await?;

    let cancel = CancellationToken::new();
    let (job, shape) = build_job(
        payload,
        &state.config,
        path_filename,
        request_id.clone(),
        cancel.clone(),
    )?;
    let out_type = job.out_type;

    info!(
        request_id = %request_id,
        out_type = ?out_type,
        vector = job.input.is_vector(),
        "export request accepted"
    );

    // The job runs detached: when the client disconnects this handler is
    // dropped, the guard cancels the token, and the worker still finishes
    // its cleanup. Only the response is abandoned.
    let service = state.service.clone();
    let task = tokio::spawn(async move { service.export(job).await });
    let guard = cancel.drop_guard();

    let outcome = task
        .await
        .map_err(|err| ApiError::Internal(format!("export task failed: {err}")))?;
    drop(guard.disarm());

    match outcome {
        Ok(artifact) => {
            info!(request_id = %request_id, bytes = artifact.len(), "export finished");
            Ok(shape_response(artifact, out_type, &shape))
        }
        Err(err) => {
            warn!(request_id = %request_id, %err, "export failed");
            Err(err.into())
        }
    }
}

/// Encode the artifact per the requested response shape: base-64 text, or
/// the typed body with an attachment disposition unless downloads are
/// suppressed.
fn shape_response(artifact: ExportArtifact, out_type: OutputType, shape: &ResponseShape) -> Response {
    if shape.b64 {
        let encoded = match artifact {
            ExportArtifact::Binary(bytes) => BASE64.encode(bytes),
            ExportArtifact::Text(text) => BASE64.encode(text.as_bytes()),
        };
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            encoded,
        )
            .into_response();
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(out_type.content_type()),
    );
    if !shape.no_download {
        let disposition = format!("attachment; filename=\"{}\"", shape.filename);
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    match artifact {
        ExportArtifact::Text(text) => (StatusCode::OK, headers, text).into_response(),
        ExportArtifact::Binary(bytes) => (StatusCode::OK, headers, bytes).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_shape_encodes_binary() {
        let shape = ResponseShape {
            b64: true,
            no_download: false,
            filename: "chart.png".to_string(),
        };
        let response = shape_response(
            ExportArtifact::Binary(vec![0xFF, 0xD8, 0xFF]),
            OutputType::Jpeg,
            &shape,
        );
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/"));
    }

    #[test]
    fn test_attachment_disposition_default() {
        let shape = ResponseShape {
            b64: false,
            no_download: false,
            filename: "chart.png".to_string(),
        };
        let response = shape_response(
            ExportArtifact::Binary(vec![1, 2, 3]),
            OutputType::Png,
            &shape,
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"chart.png\""
        );
    }

    #[test]
    fn test_no_download_drops_disposition() {
        let shape = ResponseShape {
            b64: false,
            no_download: true,
            filename: "chart.svg".to_string(),
        };
        let response = shape_response(
            ExportArtifact::Text("<svg/>".to_string()),
            OutputType::Svg,
            &shape,
        );
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/svg+xml"
        );
    }
}
