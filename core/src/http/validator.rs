use crate::error::{ReconError, Result};

const MAX_NETLOC_LEN: usize = 255;
const FORBIDDEN_NETLOC_CHARS: [char; 5] = ['<', '>', '"', '\'', '%'];

/// Checks that `candidate` is an absolute http(s) URL with a sane host part
/// and hands it back untouched.
///
/// The length and character checks run against the network location exactly
/// as written, before any percent-decoding or IDNA normalisation. Nothing else
/// about the host is checked here; a host the client cannot resolve or a port
/// out of range fails later, at send time.
pub fn validate_url(candidate: &str) -> Result<&str> {
    let netloc = raw_netloc(candidate).unwrap_or("");
    let scheme = raw_scheme(candidate);

    if scheme.is_none() || netloc.is_empty() {
        return Err(ReconError::Validation(format!(
            "missing scheme or host in '{}'",
            candidate
        )));
    }

    let scheme = scheme.unwrap_or_default().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(ReconError::Validation(format!("unsupported scheme: {}", scheme)));
    }

    if netloc.len() > MAX_NETLOC_LEN {
        return Err(ReconError::Validation(format!(
            "host is longer than {} characters",
            MAX_NETLOC_LEN
        )));
    }

    if netloc.contains(&FORBIDDEN_NETLOC_CHARS[..]) {
        return Err(ReconError::Validation(format!(
            "forbidden characters in host '{}'",
            netloc
        )));
    }

    Ok(candidate)
}

/// Scheme as written, if the prefix before the first ':' is a valid scheme.
fn raw_scheme(candidate: &str) -> Option<&str> {
    let (scheme, _) = candidate.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// `[userinfo@]host[:port]` as written, when the URL has an authority part.
fn raw_netloc(candidate: &str) -> Option<&str> {
    let (_, rest) = candidate.split_once(':')?;
    let rest = rest.strip_prefix("//")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}
