use std::fmt;

pub(crate) type OcraResult<T> = Result<T, Error>;

/// Errors that can occur when loading grammars/themes or tokenizing
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// JSON parsing failed when loading a grammar or a theme.
    Json(serde_json::Error),

    /// The regex engine refused to compile a list of patterns.
    /// End and while patterns are rewritten at runtime (backreferences, anchors) so we can't
    /// validate them all ahead.
    #[allow(missing_docs)]
    InvalidRegex { patterns: Vec<String>, message: String },

    /// No grammar was provided for the requested root scope.
    GrammarNotFound(String),

    /// A theme refers to a color that is not part of the color map given by the caller.
    #[allow(missing_docs)]
    MissingColor { color: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::InvalidRegex { patterns, message } => write!(
                f,
                "failed to compile a scanner of {} pattern(s): {}",
                patterns.len(),
                message
            ),
            Error::GrammarNotFound(name) => write!(f, "no grammar provided for <{}>", name),
            Error::MissingColor { color } => write!(f, "missing {} in color map", color),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::InvalidRegex { .. } | Error::GrammarNotFound(_) | Error::MissingColor { .. } => {
                None
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
