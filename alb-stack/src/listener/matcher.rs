use regex::{Regex, RegexBuilder};

use super::request::RequestContext;

pub const MAX_PATTERN_LEN: usize = 128;

/// Listener-rule wildcard: `*` matches any run of characters (including
/// `/`), `?` matches exactly one. Everything else is literal and the whole
/// input has to match.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    re: Regex,
}

impl Glob {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, String> {
        let mut src = String::with_capacity(pattern.len() + 8);
        src.push_str("^(?s:");
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    src.push_str(&regex::escape(&literal));
                    literal.clear();
                    src.push_str(if ch == '*' { ".*" } else { "." });
                }
                _ => literal.push(ch),
            }
        }
        src.push_str(&regex::escape(&literal));
        src.push_str(")$");

        let re = RegexBuilder::new(&src)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            pattern: pattern.to_string(),
            re,
        })
    }

    #[inline]
    pub fn is_match(&self, s: &str) -> bool {
        self.re.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Checks the shape of a path pattern, returns the reason it is unusable.
pub fn check_path_pattern(p: &str) -> Result<(), String> {
    check_len(p)?;
    if !p.starts_with('/') && !p.starts_with('*') {
        return Err("must start with '/' or '*'".into());
    }
    const EXTRA: &str = "_-.$/~\"'@:+&*?";
    match p.chars().find(|c| !c.is_ascii_alphanumeric() && !EXTRA.contains(*c)) {
        Some(c) => Err(format!("character '{c}' is not allowed")),
        None => Ok(()),
    }
}

pub fn check_host_pattern(p: &str) -> Result<(), String> {
    check_len(p)?;
    match p
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !"-.*?".contains(*c))
    {
        Some(c) => Err(format!("character '{c}' is not allowed")),
        None => Ok(()),
    }
}

pub fn check_header_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 40 {
        return Err("must be 1-40 characters".into());
    }
    match name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        Some(c) => Err(format!("character '{c}' is not allowed")),
        None => Ok(()),
    }
}

pub fn check_header_value(p: &str) -> Result<(), String> {
    check_len(p)?;
    if p.chars().any(|c| c.is_control()) {
        return Err("control characters are not allowed".into());
    }
    Ok(())
}

pub fn check_method(m: &str) -> Result<(), String> {
    if m.is_empty() || m.len() > 40 {
        return Err("must be 1-40 characters".into());
    }
    if !m.chars().all(|c| c.is_ascii_uppercase() || c == '-' || c == '_') {
        return Err("use upper case letters, '-' or '_'".into());
    }
    Ok(())
}

fn check_len(p: &str) -> Result<(), String> {
    if p.is_empty() {
        return Err("must not be empty".into());
    }
    if p.len() > MAX_PATTERN_LEN {
        return Err(format!("longer than {MAX_PATTERN_LEN} characters"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HeaderCondition {
    /// Lower-cased.
    pub name: String,
    pub values: Vec<Glob>,
}

/// Compiled conditions of one rule.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub paths: Option<Vec<Glob>>,
    pub hosts: Option<Vec<Glob>>,
    pub methods: Option<Vec<String>>,
    pub headers: Vec<HeaderCondition>,
}

impl Conditions {
    pub fn matches(&self, req: &RequestContext) -> bool {
        if let Some(ms) = &self.methods {
            if !ms.iter().any(|m| *m == req.method) {
                return false;
            }
        }
        if let Some(ps) = &self.paths {
            if !ps.iter().any(|p| p.is_match(&req.path)) {
                return false;
            }
        }
        if let Some(hs) = &self.hosts {
            let Some(host) = req.host.as_deref() else {
                return false;
            };
            if !hs.iter().any(|h| h.is_match(host)) {
                return false;
            }
        }
        self.headers.iter().all(|hc| {
            req.header(&hc.name)
                .is_some_and(|v| hc.values.iter().any(|g| g.is_match(v)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> Glob {
        Glob::new(p, false).unwrap()
    }

    #[test]
    fn literal_pattern_is_exact() {
        let g = glob("/routes");
        assert!(g.is_match("/routes"));
        assert!(!g.is_match("/routes/1"));
        assert!(!g.is_match("/Routes"));
    }

    #[test]
    fn star_crosses_segments() {
        let g = glob("/api/*");
        assert!(g.is_match("/api/"));
        assert!(g.is_match("/api/v1/users"));
        assert!(!g.is_match("/api"));
    }

    #[test]
    fn question_mark_is_one_char() {
        let g = glob("/v?/items");
        assert!(g.is_match("/v1/items"));
        assert!(!g.is_match("/v10/items"));
        assert!(!g.is_match("/v/items"));
    }

    #[test]
    fn regex_metacharacters_stay_literal() {
        let g = glob("/a.b$+");
        assert!(g.is_match("/a.b$+"));
        assert!(!g.is_match("/aXb$+"));
    }

    #[test]
    fn host_glob_can_ignore_case() {
        let g = Glob::new("*.example.com", true).unwrap();
        assert!(g.is_match("API.Example.com"));
        assert!(!g.is_match("example.com"));
    }

    #[test]
    fn path_pattern_shape() {
        assert!(check_path_pattern("/routes/*").is_ok());
        assert!(check_path_pattern("*.jpg").is_ok());
        assert!(check_path_pattern("routes").is_err());
        assert!(check_path_pattern("/a[b]").is_err());
        assert!(check_path_pattern(&format!("/{}", "a".repeat(128))).is_err());
    }

    #[test]
    fn method_shape() {
        assert!(check_method("GET").is_ok());
        assert!(check_method("CUSTOM-VERB").is_ok());
        assert!(check_method("get").is_err());
    }

    #[test]
    fn condition_kinds_are_anded() {
        let c = Conditions {
            paths: Some(vec![glob("/routes")]),
            methods: Some(vec!["POST".into()]),
            ..Default::default()
        };
        assert!(c.matches(&RequestContext::new("POST", "/routes")));
        assert!(!c.matches(&RequestContext::new("GET", "/routes")));
        assert!(!c.matches(&RequestContext::new("POST", "/other")));
    }

    #[test]
    fn header_condition_requires_header() {
        let c = Conditions {
            headers: vec![HeaderCondition {
                name: "x-env".into(),
                values: vec![Glob::new("stag*", true).unwrap()],
            }],
            ..Default::default()
        };
        assert!(c.matches(&RequestContext::new("GET", "/").with_header("X-Env", "Staging")));
        assert!(!c.matches(&RequestContext::new("GET", "/")));
    }

    #[test]
    fn host_condition_without_host_never_matches() {
        let c = Conditions {
            hosts: Some(vec![Glob::new("*", true).unwrap()]),
            ..Default::default()
        };
        assert!(!c.matches(&RequestContext::new("GET", "/")));
    }
}
