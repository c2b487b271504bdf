//! User identity and placeholder substitution
//!
//! Namespace templates and Application manifest templates carry a single
//! `{{ __user }}` placeholder. Substitution is a literal replace-all - there
//! is deliberately no expression evaluation, so a manifest template can never
//! be made to execute anything. The identity itself is validated before it is
//! ever substituted: it ends up inside namespace names and role binding
//! names, so it must be a safe DNS label fragment.

use std::fmt;

use serde::Serialize;

use crate::{Error, Result};

/// The literal placeholder replaced with the user identity
pub const USER_PLACEHOLDER: &str = "{{ __user }}";

/// Longest accepted identity. Generated names append prefixes and suffixes
/// to the identity and must stay under the 63-character DNS label limit.
pub const MAX_IDENTITY_LEN: usize = 40;

/// A validated, opaque user identity
///
/// Supplied by the upstream auth proxy; the deployer never resolves or
/// invents identities, it only checks that the string is safe to embed in
/// resource names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Validate and wrap a raw identity string
    ///
    /// Accepts non-empty strings of at most [`MAX_IDENTITY_LEN`] lowercase
    /// alphanumerics and dashes, not starting or ending with a dash.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::validation("user identity is empty"));
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(Error::validation(format!(
                "user identity '{}' exceeds {} characters",
                raw, MAX_IDENTITY_LEN
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation(format!(
                "user identity '{}' contains characters unsafe in namespace names",
                raw
            )));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(Error::validation(format!(
                "user identity '{}' must not start or end with '-'",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Substitute the user identity into a template
///
/// Replaces every occurrence of [`USER_PLACEHOLDER`]. Templates without the
/// placeholder pass through unchanged.
pub fn substitute(template: &str, user: &UserIdentity) -> String {
    template.replace(USER_PLACEHOLDER, user.as_str())
}
