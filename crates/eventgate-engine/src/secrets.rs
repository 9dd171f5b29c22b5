//! Repository credential selection.
//!
//! A credential secret announces the repositories it covers through
//! annotations whose values are URL prefixes: `kabanero.io/git-*`
//! (preferred) or `tekton.dev/git-*`. Selection scans the annotated
//! secrets in order and returns the first match, with any
//! `kabanero.io` match winning over a `tekton.dev` one. Fetching the
//! secrets themselves is the orchestrator client's job.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::traits::{Credential, CredentialError, CredentialSource};

/// Annotation prefix that wins ties.
pub const PREFERRED_ANNOTATION: &str = "kabanero.io/git-";
/// Fallback annotation prefix.
pub const FALLBACK_ANNOTATION: &str = "tekton.dev/git-";

/// A secret as the selection logic sees it: name, annotations, and the
/// basic-auth fields.
#[derive(Debug, Clone)]
pub struct AnnotatedSecret {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub username: String,
    pub password: String,
}

impl AnnotatedSecret {
    fn matches(&self, annotation_prefix: &str, repo_url: &str) -> bool {
        self.annotations
            .iter()
            .any(|(key, value)| key.starts_with(annotation_prefix) && repo_url.starts_with(value.as_str()))
    }
}

/// Pick the credential for `repo_url` from `secrets`, honoring the
/// annotation preference order.
pub fn select_credential(secrets: &[AnnotatedSecret], repo_url: &str) -> Option<Credential> {
    let mut fallback: Option<&AnnotatedSecret> = None;
    for secret in secrets {
        if secret.matches(PREFERRED_ANNOTATION, repo_url) {
            return Some(credential_from(secret));
        }
        if fallback.is_none() && secret.matches(FALLBACK_ANNOTATION, repo_url) {
            fallback = Some(secret);
        }
    }
    fallback.map(credential_from)
}

fn credential_from(secret: &AnnotatedSecret) -> Credential {
    Credential {
        username: secret.username.clone(),
        token: secret.password.clone(),
        secret_name: secret.name.clone(),
    }
}

/// [`CredentialSource`] over a fixed secret list. Useful in tests and
/// in deployments that mount credentials as files.
pub struct StaticCredentialSource {
    secrets: Vec<AnnotatedSecret>,
}

impl StaticCredentialSource {
    pub fn new(secrets: Vec<AnnotatedSecret>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn lookup(&self, repo_url: &str) -> Result<Credential, CredentialError> {
        select_credential(&self.secrets, repo_url).ok_or_else(|| CredentialError::NotFound {
            url: repo_url.to_string(),
        })
    }
}
