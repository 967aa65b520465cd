use thiserror::Error;

/// Failure to read a page's local history record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history record has no `name=` line")]
    MissingName,
}

/// Failure to isolate the rendered content region of a preview response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The preview page carries no content container. PmWiki serves the login
    /// form instead of a preview when the session has expired.
    #[error("content container `#{element_id}` missing from preview response")]
    MissingContentContainer { element_id: String },
}
