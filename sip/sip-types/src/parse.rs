//! Character classes and small helpers shared by the parsers in this crate

/// Characters allowed in the user part of a SIP URI
pub(crate) fn user_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' | '%' | '&' | '=' | '+' | '$'
                | ',' | ';' | '?' | '/'
        )
}

/// Characters allowed in URI parameter names and values
pub(crate) fn param_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' | '%' | '[' | ']' | '/' | ':'
                | '&' | '+' | '$'
        )
}

/// Strip `"` quoting from a header parameter value
pub(crate) fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
