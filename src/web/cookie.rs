use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
        })
    }
}

/// A cookie to be sent as a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub max_age: Option<i64>,
}

impl Cookie {
    /// A root session cookie following the environment's policy: relaxed,
    /// `localhost`-scoped and insecure in development; strict, scoped to the
    /// configured domain and secure in production.
    pub fn root(
        name: impl Into<String>,
        value: impl Into<String>,
        http_only: bool,
        production: bool,
        domain: &str,
    ) -> Self {
        let (same_site, domain) = if production {
            (SameSite::Strict, domain.to_string())
        } else {
            (SameSite::Lax, "localhost".to_string())
        };
        Self {
            name: name.into(),
            value: value.into(),
            domain,
            path: "/".to_string(),
            secure: production,
            http_only,
            same_site,
            max_age: None,
        }
    }

    /// An expired, empty cookie that makes the browser drop `name`.
    pub fn removal(name: impl Into<String>, production: bool, domain: &str) -> Self {
        let mut cookie = Self::root(name, "", true, production, domain);
        cookie.max_age = Some(0);
        cookie
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.max(0))?;
        }
        write!(f, "; Domain={}; Path={}", self.domain, self.path)?;
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        write!(f, "; SameSite={}", self.same_site)
    }
}

/// Looks `name` up in a `Cookie` request header value.
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim_matches('"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_cookies_are_relaxed() {
        let cookie = Cookie::root("sid", "abc", true, false, "example.com");
        assert_eq!(cookie.same_site, SameSite::Lax);
        assert_eq!(cookie.domain, "localhost");
        assert!(!cookie.secure);
        assert_eq!(
            cookie.to_string(),
            "sid=abc; Domain=localhost; Path=/; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn production_cookies_are_strict() {
        let cookie = Cookie::root("sid", "abc", false, true, "example.com");
        assert_eq!(
            cookie.to_string(),
            "sid=abc; Domain=example.com; Path=/; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn http_only_follows_the_argument_in_both_modes() {
        for production in [false, true] {
            let on = Cookie::root("a", "1", true, production, "example.com");
            let off = Cookie::root("a", "1", false, production, "example.com");
            assert!(on.http_only);
            assert!(!off.http_only);
            assert_eq!(on.secure, off.secure);
            assert_eq!(on.same_site, off.same_site);
            assert_eq!(on.domain, off.domain);
        }
    }

    #[test]
    fn removal_expires_immediately() {
        let cookie = Cookie::removal("sid", true, "example.com");
        assert_eq!(
            cookie.to_string(),
            "sid=; Max-Age=0; Domain=example.com; Path=/; HttpOnly; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn find_cookie_parses_request_header() {
        let header = "theme=dark; sid=\"xyz\"; empty=";
        assert_eq!(find_cookie(header, "sid"), Some("xyz"));
        assert_eq!(find_cookie(header, "empty"), Some(""));
        assert_eq!(find_cookie(header, "missing"), None);
    }
}
