use std::borrow::Cow;

/// Cookie names are case-sensitive, values are returned trimmed.
pub fn get_cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    let mut s = cookie_header;

    loop {
        s = s.trim_start_matches(|c: char| c == ' ' || c == ';');
        if s.is_empty() {
            return None;
        }

        let end = s.find(';').unwrap_or(s.len());
        let pair = &s[..end];
        s = if end < s.len() { &s[end + 1..] } else { "" };

        let Some(eq) = pair.find('=') else { continue; };
        if pair[..eq].trim() != name {
            continue;
        }
        return Some(pair[eq + 1..].trim());
    }
}

/// Session token carried under `name`.
///
/// Large tokens are split into shards `name-0`, `name-1`, ... which are
/// joined back in shard order. An unsharded cookie wins when both exist.
pub fn session_token<'a>(cookie_header: &'a str, name: &str) -> Option<Cow<'a, str>> {
    if let Some(v) = get_cookie_value(cookie_header, name).filter(|v| !v.is_empty()) {
        return Some(Cow::Borrowed(v));
    }

    let mut joined = String::new();
    for shard in 0.. {
        match get_cookie_value(cookie_header, &format!("{name}-{shard}")) {
            Some(v) => joined.push_str(v),
            None => break,
        }
    }

    if joined.is_empty() {
        None
    } else {
        Some(Cow::Owned(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_value_among_pairs() {
        let h = "theme=dark; AWSELBAuthSessionCookie=abc123 ; lang=en";
        assert_eq!(get_cookie_value(h, "AWSELBAuthSessionCookie"), Some("abc123"));
        assert_eq!(get_cookie_value(h, "lang"), Some("en"));
        assert_eq!(get_cookie_value(h, "missing"), None);
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_eq!(get_cookie_value("Session=a", "session"), None);
    }

    #[test]
    fn skips_pairs_without_equals() {
        assert_eq!(get_cookie_value("flag; sid=1", "sid"), Some("1"));
    }

    #[test]
    fn joins_sharded_tokens_in_order() {
        let h = "sess-1=def; other=x; sess-0=abc; sess-2=ghi";
        assert_eq!(session_token(h, "sess").as_deref(), Some("abcdefghi"));
    }

    #[test]
    fn plain_cookie_beats_shards() {
        let h = "sess-0=abc; sess=whole";
        assert_eq!(session_token(h, "sess").as_deref(), Some("whole"));
    }

    #[test]
    fn empty_cookie_is_no_token() {
        assert_eq!(session_token("sess=", "sess"), None);
        assert_eq!(session_token("", "sess"), None);
    }
}
