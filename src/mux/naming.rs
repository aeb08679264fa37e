//! Session naming conventions.
//!
//! Session names are the only identifier tmux gives back, so these functions
//! are the schema: ad hoc tunnels are named from host and local port, and the
//! managed proxy session embeds its configuration name behind a reserved
//! prefix so the active configuration can always be recovered from a live
//! session listing.

/// Name for an ad hoc tunnel: `<host>_<local_port>`.
///
/// tmux rejects `.` and `:` in session names, so both become `_`. The mapping
/// is deterministic, which makes two requests for the same host and local
/// port collide on purpose.
pub fn tunnel_session_name(host: &str, local_port: u16) -> String {
    let host: String = host
        .chars()
        .map(|c| if c == '.' || c == ':' { '_' } else { c })
        .collect();
    format!("{host}_{local_port}")
}

/// Name for the managed proxy session running `config`.
pub fn managed_session_name(prefix: &str, config: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + config.len() + 8);
    name.push_str(prefix);
    for c in config.chars() {
        match c {
            '%' => name.push_str("%25"),
            '.' => name.push_str("%2E"),
            ':' => name.push_str("%3A"),
            _ => name.push(c),
        }
    }
    name
}

/// Recover the configuration name from a managed session name.
///
/// Returns `None` for sessions outside the prefix, an empty remainder, or a
/// malformed escape.
pub fn config_from_session_name(prefix: &str, session: &str) -> Option<String> {
    let encoded = session.strip_prefix(prefix)?;
    if encoded.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let escape = rest.get(idx..idx + 3)?;
        out.push(match escape {
            "%25" => '%',
            "%2E" => '.',
            "%3A" => ':',
            _ => return None,
        });
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// First live managed session's configuration, if any.
pub fn active_config<'a, I>(prefix: &str, sessions: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    sessions
        .into_iter()
        .find_map(|s| config_from_session_name(prefix, s))
}
