use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Protocol(#[from] chromiumoxide::error::CdpError),

    #[error("page is closed or detached")]
    PageGone,

    #[error("renderer script failed: {0}")]
    Script(String),

    #[error("library sources failed to initialise in the page")]
    LibraryInit,
}

impl From<RenderError> for common::ExportError {
    fn from(err: RenderError) -> Self {
        common::ExportError::Render(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
