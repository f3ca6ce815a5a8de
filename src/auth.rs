//! Mapping from the opaque `AuthRequired` tags in a queries file to the
//! concrete authorization policies a service author wants applied.
//!
//! The engine never interprets tags; the transport layer resolves them
//! through a translation map defined by the service author and applies the
//! resulting policies before invoking [`crate::engine::QueryStore::execute`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::MethodDefinition;

/// One concrete authorization policy a tag can translate to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub realm: String,
    pub auth_type: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub approved_list: Vec<String>,
}

/// The service author's tag-to-policy mapping. Keys must match the
/// `AuthRequired` strings used in the queries files.
pub type PolicyTranslation = HashMap<String, AuthPolicy>;

#[derive(Debug, Error)]
#[error("no auth policy mapped for tag {tag:?} on {service}/{method}")]
pub struct UnknownPolicyTag {
    pub tag: String,
    pub service: String,
    pub method: String,
}

/// Resolve every `AuthRequired` tag on a definition to its policy, in tag
/// order. A tag absent from the translation map is an error naming it, so a
/// misspelled tag fails service startup instead of silently weakening
/// authorization.
pub fn resolve_policies<'a>(
    method: &MethodDefinition,
    translation: &'a PolicyTranslation,
) -> Result<Vec<&'a AuthPolicy>, UnknownPolicyTag> {
    let mut policies = Vec::with_capacity(method.auth_required.len());
    for tag in &method.auth_required {
        match translation.get(tag) {
            Some(policy) => policies.push(policy),
            None => {
                return Err(UnknownPolicyTag {
                    tag: tag.clone(),
                    service: method.service_name.clone(),
                    method: method.method_name.clone(),
                })
            }
        }
    }
    Ok(policies)
}
