//! Small parsing helpers shared between the sip- and sdp-types crates.

use nom::character::complete::multispace0;
use nom::error::{ParseError, VerboseError};
use nom::sequence::delimited;
use nom::Parser;

pub type IResult<I, O> = nom::IResult<I, O, nom::error::VerboseError<I>>;

pub use nom::Finish;

/// Wrap a parser to consume any surrounding whitespace
pub fn ws<'a, O, E, F>(parser: F) -> impl FnMut(&'a str) -> nom::IResult<&'a str, O, E>
where
    E: ParseError<&'a str>,
    F: Parser<&'a str, O, E>,
{
    delimited(multispace0, parser, multispace0)
}

pub fn verbose_error_to_owned(i: VerboseError<&str>) -> VerboseError<String> {
    VerboseError {
        errors: i
            .errors
            .into_iter()
            .map(|(i, kind)| (i.into(), kind))
            .collect(),
    }
}

/// Linear whitespace as allowed between SIP header tokens
pub fn lws(c: char) -> bool {
    matches!(c, ' ' | '\t')
}
