use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{AppError, BoxFuture};

/// The authenticated caller of an operation.
///
/// `None` in an `Option<Subject>` is the anonymous caller; access lists
/// address it with the reserved `anonymous` pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Unique subject identifier.
    pub uid: String,
    /// Role names carried by the subject.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Subject {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }
}

/// Turns an opaque bearer token into a [`Subject`].
///
/// Token decoding lives outside this workspace; deployments plug their JWT
/// or OAuth validation in through this trait.
pub trait TokenAuthenticator: Send + Sync + 'static {
    fn authenticate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Subject, AppError>>;
}

/// Authenticator backed by a fixed token table.
#[derive(Clone, Default)]
pub struct StaticAuthenticator {
    tokens: Arc<HashMap<String, Subject>>,
}

impl StaticAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, Subject)>) -> Self {
        Self {
            tokens: Arc::new(tokens.into_iter().collect()),
        }
    }
}

impl TokenAuthenticator for StaticAuthenticator {
    fn authenticate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Subject, AppError>> {
        let result = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::PermissionDenied("unknown token".into()));
        Box::pin(async move { result })
    }
}
