//! Authentication descriptors.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::RequestError;

/// A set of HTTP authentication schemes the transfer may use.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AuthScheme(u32);

impl AuthScheme {
    /// No scheme.
    pub const NONE: Self = Self(0);
    /// HTTP Basic.
    pub const BASIC: Self = Self(1 << 0);
    /// HTTP Digest.
    pub const DIGEST: Self = Self(1 << 1);
    /// HTTP Digest with the IE path quirk.
    pub const DIGEST_IE: Self = Self(1 << 4);
    /// Bearer token.
    pub const BEARER: Self = Self(1 << 6);
    /// HTTP Negotiate (SPNEGO).
    pub const NEGOTIATE: Self = Self(1 << 2);
    /// NTLM.
    pub const NTLM: Self = Self(1 << 3);
    /// AWS Signature Version 4.
    pub const AWS_SIGV4: Self = Self(1 << 7);
    /// Use the listed scheme without probing the server first.
    pub const ONLY: Self = Self(1 << 31);
    /// Every scheme except Digest-IE.
    pub const ANY: Self = Self(!Self::DIGEST_IE.0 & !Self::ONLY.0);
    /// Every scheme considered secure (not Basic).
    pub const ANYSAFE: Self = Self(Self::ANY.0 & !Self::BASIC.0);

    const NAMES: [(&'static str, Self); 7] = [
        ("basic", Self::BASIC),
        ("digest", Self::DIGEST),
        ("digest_ie", Self::DIGEST_IE),
        ("bearer", Self::BEARER),
        ("negotiate", Self::NEGOTIATE),
        ("ntlm", Self::NTLM),
        ("aws_sigv4", Self::AWS_SIGV4),
    ];

    /// Parse a scheme list such as `["basic"]`, `["bearer", "only"]` or `["any"]`.
    ///
    /// `any` and `anysafe` must be the only value. `only` needs exactly one
    /// companion scheme and may not be repeated. An empty list is rejected.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, RequestError> {
        if values.is_empty() {
            return Err(RequestError::InvalidAuthScheme(
                "an empty list cannot be specified as an authentication scheme".to_string(),
            ));
        }

        let mut scheme = Self::NONE;
        for (idx, value) in values.iter().enumerate() {
            let value = value.as_ref();
            match value {
                "any" | "anysafe" => {
                    if values.len() != 1 {
                        return Err(RequestError::InvalidAuthScheme(format!(
                            "\"{value}\" option is allowed if it is the only value"
                        )));
                    }
                    scheme = if value == "any" { Self::ANY } else { Self::ANYSAFE };
                }
                "only" => {
                    if values.len() != 2 {
                        return Err(RequestError::InvalidAuthScheme(
                            "\"only\" option can be specified in conjunction with one specific authentication value"
                                .to_string(),
                        ));
                    }
                    if idx == 1 && scheme == Self::ONLY {
                        return Err(RequestError::InvalidAuthScheme(
                            "\"only\" option specified twice".to_string(),
                        ));
                    }
                    scheme |= Self::ONLY;
                }
                name => {
                    let Some((_, bits)) = Self::NAMES.iter().find(|(n, _)| *n == name) else {
                        return Err(RequestError::InvalidAuthScheme(format!(
                            "bad auth scheme option \"{name}\": must be any, anysafe, only, basic, \
                             digest, digest_ie, bearer, negotiate, ntlm, or aws_sigv4"
                        )));
                    };
                    scheme |= *bits;
                }
            }
        }
        Ok(scheme)
    }

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no scheme bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The set without the `only` modifier.
    pub fn schemes(self) -> Self {
        Self(self.0 & !Self::ONLY.0)
    }
}

impl BitOr for AuthScheme {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthScheme {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, bits)| self.contains(*bits))
            .map(|(name, _)| *name)
            .collect();
        if self.contains(Self::ONLY) {
            names.push("only");
        }
        f.debug_tuple("AuthScheme").field(&names).finish()
    }
}

/// Credentials and scheme selection for a request or session.
///
/// Secrets are redacted from the `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// AWS SigV4 provider descriptor, e.g. `aws:amz:us-east-1:s3`.
    pub aws_sigv4: Option<String>,
    /// Explicit scheme set.
    pub scheme: Option<AuthScheme>,
}

impl Auth {
    /// Username/password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Bearer token credentials.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Set the explicit scheme.
    pub fn with_scheme(mut self, scheme: AuthScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// The scheme the transfer is configured with.
    ///
    /// Without an explicit scheme, a bearer token selects bearer-only auth.
    pub fn effective_scheme(&self) -> Option<AuthScheme> {
        match (self.scheme, &self.token) {
            (Some(scheme), _) => Some(scheme),
            (None, Some(_)) => Some(AuthScheme::BEARER | AuthScheme::ONLY),
            (None, None) => None,
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |v: &Option<String>| v.as_ref().map(|_| "<hidden>");
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &hidden(&self.password))
            .field("token", &hidden(&self.token))
            .field("aws_sigv4", &self.aws_sigv4)
            .field("scheme", &self.scheme)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_schemes() {
        assert_eq!(AuthScheme::parse(&["basic"]).unwrap(), AuthScheme::BASIC);
        assert_eq!(
            AuthScheme::parse(&["basic", "digest"]).unwrap(),
            AuthScheme::BASIC | AuthScheme::DIGEST
        );
        assert_eq!(AuthScheme::parse(&["any"]).unwrap(), AuthScheme::ANY);
        assert!(!AuthScheme::ANYSAFE.contains(AuthScheme::BASIC));
        assert!(AuthScheme::ANYSAFE.contains(AuthScheme::DIGEST));
    }

    #[test]
    fn test_parse_only() {
        assert_eq!(
            AuthScheme::parse(&["bearer", "only"]).unwrap(),
            AuthScheme::BEARER | AuthScheme::ONLY
        );
        assert_eq!(
            AuthScheme::parse(&["only", "ntlm"]).unwrap(),
            AuthScheme::NTLM | AuthScheme::ONLY
        );
        assert!(AuthScheme::parse(&["only"]).is_err());
        assert!(AuthScheme::parse(&["only", "basic", "digest"]).is_err());
        let err = AuthScheme::parse(&["only", "only"]).unwrap_err();
        assert_eq!(err.to_string(), "\"only\" option specified twice");
    }

    #[test]
    fn test_parse_rejects_bad_lists() {
        assert!(AuthScheme::parse::<&str>(&[]).is_err());
        assert!(AuthScheme::parse(&["any", "basic"]).is_err());
        assert!(AuthScheme::parse(&["kerberos"]).is_err());
    }

    #[test]
    fn test_token_defaults_to_bearer_only() {
        let auth = Auth::bearer("t0k3n");
        assert_eq!(
            auth.effective_scheme(),
            Some(AuthScheme::BEARER | AuthScheme::ONLY)
        );

        let auth = Auth::bearer("t0k3n").with_scheme(AuthScheme::ANY);
        assert_eq!(auth.effective_scheme(), Some(AuthScheme::ANY));

        assert_eq!(Auth::basic("u", "p").effective_scheme(), None);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let text = format!("{:?}", Auth::basic("user", "s3cret"));
        assert!(text.contains("user"));
        assert!(!text.contains("s3cret"));
    }
}
