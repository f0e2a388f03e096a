use regex::Regex;
use std::fmt;

/// Case-insensitive host pattern such as `*.asos.com` or `sandro-paris.com`.
///
/// `*` matches any run of characters within one label (never a `.`), `?`
/// matches a single such character; everything else is literal.
#[derive(Clone)]
pub struct DomainGlob {
    pattern: String,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl DomainGlob {
    pub fn new(pattern: impl AsRef<str>) -> Result<Self, regex::Error> {
        let pattern = pattern.as_ref().trim().to_lowercase();
        let matcher = if pattern.contains(['*', '?']) {
            let mut expr = String::with_capacity(pattern.len() * 2 + 2);
            expr.push('^');
            for ch in pattern.chars() {
                match ch {
                    '*' => expr.push_str("[^.]*"),
                    '?' => expr.push_str("[^.]"),
                    other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
                }
            }
            expr.push('$');
            Matcher::Pattern(Regex::new(&expr)?)
        } else {
            Matcher::Exact(pattern.clone())
        };
        Ok(Self { pattern, matcher })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        match &self.matcher {
            Matcher::Exact(exact) => *exact == host,
            Matcher::Pattern(re) => re.is_match(&host),
        }
    }
}

impl fmt::Debug for DomainGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DomainGlob").field(&self.pattern).finish()
    }
}
