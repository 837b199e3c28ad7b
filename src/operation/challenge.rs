//! Authentication challenge forwarding.
//!
//! The operation never resolves credentials itself. When the transport raises a
//! challenge, the operation calls the registered [`ChallengeHook`] synchronously
//! on the transport's thread and hands the decision back verbatim.
//!
//! Known risk: no timeout is applied to the hook. A hook that never returns
//! stalls that transfer's transport thread; it cannot deadlock the operation
//! because the hook runs without holding the operation's lock.

use std::fmt;

/// Kind of authentication being negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// HTTP Basic authentication.
    Basic,
    /// HTTP Digest authentication.
    Digest,
    /// HTTP Bearer token authentication.
    Bearer,
    /// Server certificate trust evaluation.
    ServerTrust,
    /// Any other scheme, by name.
    Other(String),
}

impl ChallengeKind {
    /// Parses the scheme token of a `WWW-Authenticate` value.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Self::Basic,
            "digest" => Self::Digest,
            "bearer" => Self::Bearer,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An authentication negotiation raised mid-transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Authentication scheme requested.
    pub kind: ChallengeKind,
    /// Host issuing the challenge.
    pub host: String,
    /// Protection space realm, when advertised.
    pub realm: Option<String>,
    /// Whether a proxy issued the challenge.
    pub proxy: bool,
    /// How many previous answers to this challenge failed.
    pub previous_failure_count: u32,
}

impl Challenge {
    /// Builds a challenge from a `WWW-Authenticate` / `Proxy-Authenticate` value.
    #[must_use]
    pub fn from_header(
        header: &str,
        host: impl Into<String>,
        proxy: bool,
        previous_failure_count: u32,
    ) -> Self {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        Self {
            kind: ChallengeKind::from_scheme(scheme),
            host: host.into(),
            realm: parse_realm(params),
            proxy,
            previous_failure_count,
        }
    }
}

fn parse_realm(params: &str) -> Option<String> {
    params.split(',').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("realm")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// A username/password pair offered in answer to a challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    password: Option<String>,
}

impl Credential {
    /// Creates a credential.
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }

    /// Returns the username.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password, if any.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

// Passwords never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Decision returned for a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Answer the challenge with this credential.
    UseCredential(Credential),
    /// Let the transport apply its default handling.
    PerformDefaultHandling,
    /// Abort the transfer.
    Cancel,
    /// Reject this protection space; the transport may try another.
    RejectProtectionSpace,
}

/// Decision callback consulted for every authentication challenge.
pub trait ChallengeHook: Send + Sync {
    /// Decides how to answer `challenge`, given the operation's stored credential.
    fn decide(
        &self,
        challenge: &Challenge,
        credential: Option<&Credential>,
    ) -> ChallengeDisposition;
}

impl<F> ChallengeHook for F
where
    F: Fn(&Challenge, Option<&Credential>) -> ChallengeDisposition + Send + Sync,
{
    fn decide(
        &self,
        challenge: &Challenge,
        credential: Option<&Credential>,
    ) -> ChallengeDisposition {
        self(challenge, credential)
    }
}

/// Policy used when no hook is registered.
///
/// Offers the stored credential once; a repeated challenge is cancelled.
/// Server trust is left to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChallengeHook;

impl ChallengeHook for DefaultChallengeHook {
    fn decide(
        &self,
        challenge: &Challenge,
        credential: Option<&Credential>,
    ) -> ChallengeDisposition {
        if challenge.kind == ChallengeKind::ServerTrust {
            return ChallengeDisposition::PerformDefaultHandling;
        }
        match credential {
            Some(credential) if challenge.previous_failure_count == 0 => {
                ChallengeDisposition::UseCredential(credential.clone())
            }
            _ => ChallengeDisposition::Cancel,
        }
    }
}
