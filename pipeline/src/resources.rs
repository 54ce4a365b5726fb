//! Per-request resource injection and disposal.
//!
//! Inline scripts and styles become DOM elements tracked by id; `@import`
//! directives in the inline stylesheet are lifted into link tags. Every
//! handle is disposed in cleanup, success or failure.

use common::{ExportError, JobResources};
use hcexport_renderer::EnginePage;
use tracing::warn;

/// Handles of everything injected for one job.
#[derive(Debug, Default)]
pub struct InjectedResources {
    ids: Vec<String>,
}

impl InjectedResources {
    pub fn handle_count(&self) -> usize {
        self.ids.len()
    }

    /// Track an element injected outside the resource set (e.g. the
    /// size-only style of the injection path) so disposal covers it too.
    pub fn track(&mut self, id: String) {
        self.ids.push(id);
    }

    pub fn absorb(&mut self, other: InjectedResources) {
        self.ids.extend(other.ids);
    }

    /// Remove every injected element. Failures are logged; disposal keeps
    /// going so a dead page never strands the remaining handles.
    pub async fn dispose(self, page: &dyn EnginePage) {
        for id in self.ids {
            if let Err(err) = page.remove_element(&id).await {
                warn!(%id, %err, "failed to remove injected resource");
            }
        }
    }
}

/// Inject the job's resources into the page.
///
/// Local file paths are honoured only when `allow_file_resources` is set;
/// everything else must be a URL. URL-based `@import`s are lifted
/// unconditionally, file-based ones only under the same flag.
pub async fn inject(
    page: &dyn EnginePage,
    resources: &JobResources,
    allow_file_resources: bool,
    request_id: &str,
) -> Result<InjectedResources, ExportError> {
    let mut injected = InjectedResources::default();
    let mut sequence = 0usize;
    let mut next_id = |kind: &str| {
        sequence += 1;
        format!("hc-res-{kind}-{request_id}-{sequence}")
    };

    if let Some(js) = resources.js.as_deref() {
        let id = next_id("js");
        page.add_script(js, &id).await.map_err(ExportError::from)?;
        injected.ids.push(id);
    }

    for file in &resources.files {
        let id = next_id("file");
        if is_url(file) {
            page.add_script_src(file, &id)
                .await
                .map_err(ExportError::from)?;
            injected.ids.push(id);
        } else if allow_file_resources {
            match tokio::fs::read_to_string(file).await {
                Ok(source) => {
                    page.add_script(&source, &id)
                        .await
                        .map_err(ExportError::from)?;
                    injected.ids.push(id);
                }
                Err(err) => {
                    warn!(%file, %err, "skipping unreadable resource file");
                }
            }
        } else {
            warn!(%file, "file resources are disabled, skipping");
        }
    }

    if let Some(css) = resources.css.as_deref() {
        let (imports, rest) = lift_imports(css);
        for target in imports {
            let id = next_id("css-import");
            if is_url(&target) {
                page.add_link(&target, &id).await.map_err(ExportError::from)?;
                injected.ids.push(id);
            } else if allow_file_resources {
                match tokio::fs::read_to_string(&target).await {
                    Ok(source) => {
                        page.add_style(&source, &id)
                            .await
                            .map_err(ExportError::from)?;
                        injected.ids.push(id);
                    }
                    Err(err) => {
                        warn!(%target, %err, "skipping unreadable stylesheet import");
                    }
                }
            } else {
                warn!(%target, "file-based @import disabled, skipping");
            }
        }
        if !rest.trim().is_empty() {
            let id = next_id("css");
            page.add_style(&rest, &id).await.map_err(ExportError::from)?;
            injected.ids.push(id);
        }
    }

    Ok(injected)
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Split `@import` directives off the front matter of a stylesheet.
/// Returns the import targets and the stylesheet with the directives
/// removed.
pub(crate) fn lift_imports(css: &str) -> (Vec<String>, String) {
    let mut imports = Vec::new();
    let mut rest = String::with_capacity(css.len());
    let mut remaining = css;

    while let Some(at) = remaining.find("@import") {
        rest.push_str(&remaining[..at]);
        let after = &remaining[at..];
        let Some(end) = after.find(';') else {
            // Unterminated directive: keep it verbatim.
            rest.push_str(after);
            remaining = "";
            break;
        };
        if let Some(target) = parse_import_target(&after[..end]) {
            imports.push(target);
        }
        remaining = &after[end + 1..];
    }
    rest.push_str(remaining);

    (imports, rest)
}

/// Extract the target from `@import url("x")`, `@import url(x)`,
/// `@import "x"`, or `@import 'x'`.
fn parse_import_target(directive: &str) -> Option<String> {
    let body = directive.trim_start_matches("@import").trim();
    let body = if let Some(inner) = body.strip_prefix("url(") {
        inner.trim_end_matches(')').trim()
    } else {
        body
    };
    let target = body.trim_matches(|c| c == '"' || c == '\'').trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}
