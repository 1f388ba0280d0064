use internal::verbose_error_to_owned;
use nom::error::VerboseError;

/// Error returned by [`SessionDescription::parse`](crate::SessionDescription::parse)
#[derive(Debug, thiserror::Error)]
pub enum ParseSessionDescriptionError {
    #[error("message ended unexpectedly")]
    Incomplete,
    #[error("invalid {line} line: {error:?}")]
    InvalidLine {
        line: &'static str,
        error: VerboseError<String>,
    },
    #[error("description is missing its {0} line")]
    MissingLine(&'static str),
}

impl ParseSessionDescriptionError {
    pub(crate) fn line(line: &'static str) -> impl FnOnce(nom::Err<VerboseError<&str>>) -> Self {
        move |e| match e {
            nom::Err::Incomplete(_) => ParseSessionDescriptionError::Incomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                ParseSessionDescriptionError::InvalidLine {
                    line,
                    error: verbose_error_to_owned(e),
                }
            }
        }
    }
}
