//! Export payload parsing and normalisation.
//!
//! The export route accepts JSON, URL-encoded, and multipart bodies. Form
//! transports deliver every value as a string, so the numeric and boolean
//! fields deserialize leniently, and structured fields accept either an
//! object or its stringified form.

use axum::extract::{FromRequest, Multipart, Request};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::{ChartInput, Config, ExportJob, JobResources, OutputType};

use crate::error::{ApiError, ApiResult};

/// The raw, recognised request fields.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportPayload {
    pub infile: Option<Value>,
    pub options: Option<Value>,
    pub data: Option<Value>,
    pub svg: Option<String>,
    #[serde(rename = "type")]
    pub out_type: Option<String>,
    pub constr: Option<String>,
    #[serde(deserialize_with = "loose::opt_f64")]
    pub height: Option<f64>,
    #[serde(deserialize_with = "loose::opt_f64")]
    pub width: Option<f64>,
    #[serde(deserialize_with = "loose::opt_f64")]
    pub scale: Option<f64>,
    pub callback: Option<String>,
    pub custom_code: Option<String>,
    pub resources: Option<Value>,
    pub global_options: Option<Value>,
    pub theme_options: Option<Value>,
    #[serde(deserialize_with = "loose::opt_bool")]
    pub b64: Option<bool>,
    #[serde(deserialize_with = "loose::opt_bool")]
    pub no_download: Option<bool>,
    #[serde(deserialize_with = "loose::opt_bool")]
    pub display_errors: Option<bool>,
    pub filename: Option<String>,
}

/// How the artifact should be written back.
#[derive(Debug, Clone)]
pub struct ResponseShape {
    pub b64: bool,
    pub no_download: bool,
    pub filename: String,
}

/// Parse the request body according to its content type. `max_bytes` caps
/// the accepted body size.
pub async fn parse_payload(req: Request, max_bytes: usize) -> ApiResult<ExportPayload> {
    let content_type = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;
        return parse_multipart(multipart).await;
    }

    let bytes = axum::body::to_bytes(req.into_body(), max_bytes)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("invalid url-encoded body: {e}")))?;
        return payload_from_pairs(pairs);
    }

    if bytes.is_empty() {
        return Ok(ExportPayload::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

async fn parse_multipart(mut multipart: Multipart) -> ApiResult<ExportPayload> {
    let mut pairs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart field: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("unreadable multipart field: {e}")))?;
        pairs.push((name, value));
    }
    payload_from_pairs(pairs)
}

/// Build the payload out of string key/value pairs (form transports).
fn payload_from_pairs(pairs: Vec<(String, String)>) -> ApiResult<ExportPayload> {
    let mut object = serde_json::Map::new();
    for (key, value) in pairs {
        object.insert(key, Value::String(value));
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|e| ApiError::BadRequest(format!("invalid form body: {e}")))
}

/// Normalise the payload into a job plus the response shaping, applying
/// config defaults and validating ranges.
pub fn build_job(
    payload: ExportPayload,
    config: &Config,
    path_filename: Option<String>,
    request_id: String,
    cancel: CancellationToken,
) -> ApiResult<(ExportJob, ResponseShape)> {
    let input = resolve_input(&payload, config)?;

    let out_type: OutputType = payload
        .out_type
        .as_deref()
        .unwrap_or(&config.export.out_type)
        .parse()
        .map_err(ApiError::BadRequest)?;

    let scale = payload.scale.unwrap_or(config.export.default_scale);
    if !(0.1..=5.0).contains(&scale) {
        return Err(ApiError::BadRequest(format!(
            "scale must be within 0.1 and 5.0, got {scale}"
        )));
    }

    let height = resolve_dimension(
        "height",
        payload.height,
        chart_dimension(&input, "height"),
        config.export.default_height,
    )?;
    let width = resolve_dimension(
        "width",
        payload.width,
        chart_dimension(&input, "width"),
        config.export.default_width,
    )?;

    let custom_code = payload
        .custom_code
        .clone()
        .or_else(|| config.custom_logic.custom_code.clone());
    let callback = payload
        .callback
        .clone()
        .or_else(|| config.custom_logic.callback.clone());
    if !config.custom_logic.allow_code_execution
        && (custom_code.is_some() || callback.is_some())
    {
        return Err(ApiError::BadRequest(
            "Code execution is disabled on this server (customCode, callback)".to_string(),
        ));
    }

    let resources = resolve_resources(&payload, config)?;

    let constr = payload
        .constr
        .clone()
        .unwrap_or_else(|| config.export.constr.clone());
    let constr = match constr.as_str() {
        "chart" | "stockChart" | "mapChart" | "ganttChart" => constr,
        other => {
            debug!(constr = %other, "unknown constructor, falling back to chart");
            "chart".to_string()
        }
    };

    let filename = resolve_filename(
        payload.filename.as_deref(),
        path_filename.as_deref(),
        out_type,
    );

    let shape = ResponseShape {
        b64: payload.b64.unwrap_or(false),
        no_download: payload.no_download.unwrap_or(false),
        filename,
    };

    let job = ExportJob {
        request_id,
        input,
        out_type,
        height,
        width,
        scale,
        constr,
        callback,
        custom_code,
        resources,
        global_options: parse_structured(payload.global_options.clone(), "globalOptions")?,
        theme_options: parse_structured(payload.theme_options.clone(), "themeOptions")?,
        display_errors: payload.display_errors.unwrap_or(false),
        cancel,
    };
    Ok((job, shape))
}

/// Pick the chart input out of `svg` or the first of `infile | options |
/// data`, and classify it.
fn resolve_input(payload: &ExportPayload, config: &Config) -> ApiResult<ChartInput> {
    if let Some(svg) = payload.svg.as_deref().filter(|s| !s.trim().is_empty()) {
        let input = ChartInput::classify(svg)
            .ok()
            .filter(ChartInput::is_vector)
            .ok_or_else(|| {
                ApiError::BadRequest("The svg field does not hold vector markup".to_string())
            })?;
        return Ok(input);
    }

    let raw = payload
        .infile
        .clone()
        .or_else(|| payload.options.clone())
        .or_else(|| payload.data.clone());

    match raw {
        Some(Value::Object(map)) => Ok(ChartInput::Config(Value::Object(map))),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match ChartInput::classify(&text) {
                Ok(input) => Ok(input),
                // Not vector markup and not JSON: the raw-source injection
                // path, gated on explicit code-execution opt-in.
                Err(_) if config.custom_logic.allow_code_execution => {
                    Ok(ChartInput::Injection(text))
                }
                Err(reason) => Err(ApiError::BadRequest(format!(
                    "invalid chart configuration: {reason}"
                ))),
            }
        }
        _ => Err(ApiError::BadRequest(
            "The request contains no chart data; supply infile, options, data, or svg".to_string(),
        )),
    }
}

fn resolve_dimension(
    name: &str,
    requested: Option<f64>,
    from_chart: Option<f64>,
    default: u32,
) -> ApiResult<f64> {
    let value = match requested {
        Some(value) => value,
        None => from_chart.unwrap_or(f64::from(default)),
    };
    if !value.is_finite() || value <= 0.0 {
        return Err(ApiError::BadRequest(format!(
            "{name} must be a positive number, got {value}"
        )));
    }
    Ok(value)
}

/// Dimension the chart configuration itself carries, if any.
fn chart_dimension(input: &ChartInput, name: &str) -> Option<f64> {
    match input {
        ChartInput::Config(value) => value.get("chart")?.get(name)?.as_f64(),
        _ => None,
    }
}

fn resolve_resources(payload: &ExportPayload, config: &Config) -> ApiResult<Option<JobResources>> {
    let raw = match &payload.resources {
        Some(value) => Some(value.clone()),
        None => config
            .custom_logic
            .resources
            .as_deref()
            .map(|s| Value::String(s.to_string())),
    };
    let Some(raw) = raw else {
        return Ok(None);
    };

    let resources: JobResources = match raw {
        Value::Object(_) => serde_json::from_value(raw)
            .map_err(|e| ApiError::BadRequest(format!("invalid resources object: {e}")))?,
        Value::String(text) if !text.trim().is_empty() => serde_json::from_str(&text)
            .map_err(|e| ApiError::BadRequest(format!("invalid resources JSON: {e}")))?,
        _ => return Ok(None),
    };
    Ok(if resources.is_empty() {
        None
    } else {
        Some(resources)
    })
}

fn parse_structured(raw: Option<Value>, field: &str) -> ApiResult<Option<Value>> {
    match raw {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(Value::Object(map))),
        Some(Value::String(text)) if !text.trim().is_empty() => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("invalid {field} JSON: {e}"))),
        Some(_) => Ok(None),
    }
}

/// Choose and sanitise the download filename; the output extension is
/// always appended when missing.
fn resolve_filename(
    from_payload: Option<&str>,
    from_path: Option<&str>,
    out_type: OutputType,
) -> String {
    let base = from_payload
        .or(from_path)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("chart");
    let cleaned: String = base
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '"' | '\0') && !c.is_control())
        .collect();
    let cleaned = if cleaned.is_empty() {
        "chart".to_string()
    } else {
        cleaned
    };

    let extension = format!(".{}", out_type.extension());
    if cleaned.to_ascii_lowercase().ends_with(&extension) {
        cleaned
    } else {
        format!("{cleaned}{extension}")
    }
}

mod loose {
    //! Lenient deserializers for form-borne scalars.

    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid number: {s}"))),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected a number, got {other}"
            ))),
        }
    }

    pub fn opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(None),
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                other => Err(serde::de::Error::custom(format!("invalid flag: {other}"))),
            },
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected a boolean, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    fn normalize(payload: ExportPayload) -> ApiResult<(ExportJob, ResponseShape)> {
        build_job(
            payload,
            &config(),
            None,
            "req-1".to_string(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_json_payload_with_infile_object() {
        let payload: ExportPayload =
            serde_json::from_str(r#"{"infile":{"series":[{"data":[1,3,2,4]}]}}"#).unwrap();
        let (job, shape) = normalize(payload).unwrap();
        assert!(matches!(job.input, ChartInput::Config(_)));
        assert_eq!(job.out_type, OutputType::Png);
        assert_eq!(shape.filename, "chart.png");
        assert!(!shape.b64);
    }

    #[test]
    fn test_form_strings_are_coerced() {
        let payload = payload_from_pairs(vec![
            ("infile".to_string(), r#"{"series":[]}"#.to_string()),
            ("width".to_string(), "800".to_string()),
            ("scale".to_string(), "2".to_string()),
            ("b64".to_string(), "true".to_string()),
            ("type".to_string(), "jpeg".to_string()),
        ])
        .unwrap();
        let (job, shape) = normalize(payload).unwrap();
        assert_eq!(job.width, 800.0);
        assert_eq!(job.scale, 2.0);
        assert!(shape.b64);
        assert_eq!(job.out_type, OutputType::Jpeg);
    }

    #[test]
    fn test_empty_body_is_rejected_with_chart_data_message() {
        let err = normalize(ExportPayload::default()).unwrap_err();
        assert!(err.message().contains("chart data"));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_scale_bounds() {
        for bad_scale in ["0.05", "5.5", "-1"] {
            let payload = payload_from_pairs(vec![
                ("infile".to_string(), r#"{"a":1}"#.to_string()),
                ("scale".to_string(), bad_scale.to_string()),
            ])
            .unwrap();
            assert!(normalize(payload).is_err(), "scale {bad_scale} must fail");
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let payload = payload_from_pairs(vec![
            ("infile".to_string(), r#"{"a":1}"#.to_string()),
            ("type".to_string(), "gif".to_string()),
        ])
        .unwrap();
        assert!(normalize(payload).is_err());
    }

    #[test]
    fn test_chart_config_dimensions_beat_defaults() {
        let payload: ExportPayload =
            serde_json::from_str(r#"{"infile":{"chart":{"height":950,"width":1200}}}"#).unwrap();
        let (job, _) = normalize(payload).unwrap();
        assert_eq!(job.height, 950.0);
        assert_eq!(job.width, 1200.0);
    }

    #[test]
    fn test_explicit_dimensions_beat_chart_config() {
        let payload: ExportPayload = serde_json::from_str(
            r#"{"infile":{"chart":{"height":950}},"height":300,"width":400}"#,
        )
        .unwrap();
        let (job, _) = normalize(payload).unwrap();
        assert_eq!(job.height, 300.0);
        assert_eq!(job.width, 400.0);
    }

    #[test]
    fn test_svg_field_must_be_vector() {
        let payload = payload_from_pairs(vec![("svg".to_string(), "not markup".to_string())])
            .unwrap();
        assert!(normalize(payload).is_err());

        let payload =
            payload_from_pairs(vec![("svg".to_string(), "<svg xmlns=\"x\"/>".to_string())])
                .unwrap();
        let (job, _) = normalize(payload).unwrap();
        assert!(job.input.is_vector());
    }

    #[test]
    fn test_custom_code_requires_opt_in() {
        let payload = payload_from_pairs(vec![
            ("infile".to_string(), r#"{"a":1}"#.to_string()),
            ("customCode".to_string(), "Highcharts.x = 1;".to_string()),
        ])
        .unwrap();
        let err = normalize(payload).unwrap_err();
        assert!(err.message().contains("Code execution"));

        let mut config = Config::default();
        config.custom_logic.allow_code_execution = true;
        let payload = payload_from_pairs(vec![
            ("infile".to_string(), r#"{"a":1}"#.to_string()),
            ("customCode".to_string(), "Highcharts.x = 1;".to_string()),
        ])
        .unwrap();
        let (job, _) = build_job(
            payload,
            &config,
            None,
            "req-2".to_string(),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(job.custom_code.is_some());
    }

    #[test]
    fn test_raw_config_needs_code_execution() {
        let raw = "{ series: [{ data: [1] }] }";
        let payload =
            payload_from_pairs(vec![("options".to_string(), raw.to_string())]).unwrap();
        assert!(normalize(payload).is_err(), "injection path is opt-in");

        let mut config = Config::default();
        config.custom_logic.allow_code_execution = true;
        let payload =
            payload_from_pairs(vec![("options".to_string(), raw.to_string())]).unwrap();
        let (job, _) = build_job(
            payload,
            &config,
            None,
            "req-3".to_string(),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(matches!(job.input, ChartInput::Injection(_)));
    }

    #[test]
    fn test_filename_sanitisation() {
        assert_eq!(
            resolve_filename(Some("../../etc/passwd"), None, OutputType::Png),
            "....etcpasswd.png"
        );
        assert_eq!(
            resolve_filename(None, Some("report"), OutputType::Pdf),
            "report.pdf"
        );
        assert_eq!(
            resolve_filename(Some("plot.svg"), None, OutputType::Svg),
            "plot.svg"
        );
        assert_eq!(resolve_filename(None, None, OutputType::Jpeg), "chart.jpeg");
    }

    #[test]
    fn test_resources_accept_object_and_string() {
        let payload: ExportPayload = serde_json::from_str(
            r#"{"infile":{"a":1},"resources":{"js":"window.x=1;","files":["https://x/y.js"]}}"#,
        )
        .unwrap();
        let (job, _) = normalize(payload).unwrap();
        let resources = job.resources.unwrap();
        assert_eq!(resources.files.len(), 1);

        let payload = payload_from_pairs(vec![
            ("infile".to_string(), r#"{"a":1}"#.to_string()),
            ("resources".to_string(), r#"{"css":"body{}"}"#.to_string()),
        ])
        .unwrap();
        let (job, _) = normalize(payload).unwrap();
        assert!(job.resources.unwrap().css.is_some());
    }
}
