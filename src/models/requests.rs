//! Request DTOs for the permission API
//!
//! Defines the structure of incoming query strings and request bodies.

use serde::Deserialize;

use crate::cache::{Invalidation, MAX_KEY_LENGTH};
use crate::ports::CheckRequest;

/// Query string of `GET /check`.
///
/// `context` is a comma separated list of `key=value` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckQuery {
    pub actor: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl CheckQuery {
    /// Validates the query and converts it into a [`CheckRequest`].
    pub fn into_request(self) -> Result<CheckRequest, String> {
        for (name, value) in [
            ("actor", &self.actor),
            ("resource", &self.resource),
            ("action", &self.action),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
            if value.len() > MAX_KEY_LENGTH {
                return Err(format!(
                    "{name} exceeds maximum length of {MAX_KEY_LENGTH} characters"
                ));
            }
        }

        let mut request = CheckRequest::new(self.actor, self.resource, self.action);
        if let Some(raw) = self.context {
            for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(format!("context entry '{pair}' is not key=value"));
                };
                request = request.with_context(key.trim(), value.trim());
            }
        }
        Ok(request)
    }
}

/// Body of `POST /invalidate`: exactly one of the two fields.
///
/// A `resource_key` starting with `perm:` is an exact cache key; anything
/// else names a resource across all actors.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub resource_key: Option<String>,
}

impl InvalidateRequest {
    pub fn into_invalidation(self) -> Result<Invalidation, String> {
        match (self.actor_id, self.resource_key) {
            (Some(actor_id), None) if !actor_id.is_empty() => Ok(Invalidation::Actor(actor_id)),
            (None, Some(key)) if key.starts_with("perm:") => Ok(Invalidation::Key(key)),
            (None, Some(resource)) if !resource.is_empty() => Ok(Invalidation::Resource(resource)),
            (Some(_), Some(_)) => Err("give either actor_id or resource_key, not both".to_string()),
            _ => Err("actor_id or resource_key is required".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(context: Option<&str>) -> CheckQuery {
        CheckQuery {
            actor: "u1".to_string(),
            resource: "orders".to_string(),
            action: "read".to_string(),
            context: context.map(String::from),
        }
    }

    #[test]
    fn test_check_query_parses_context() {
        let request = query(Some("tenant=acme, page = list")).into_request().unwrap();
        assert_eq!(request.context.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(request.context.get("page").map(String::as_str), Some("list"));
    }

    #[test]
    fn test_check_query_rejects_bad_context() {
        assert!(query(Some("tenant")).into_request().is_err());
    }

    #[test]
    fn test_check_query_rejects_empty_actor() {
        let mut q = query(None);
        q.actor = "  ".to_string();
        assert!(q.into_request().is_err());
    }

    #[test]
    fn test_invalidate_request_variants() {
        let by_actor: InvalidateRequest = serde_json::from_str(r#"{"actor_id":"u1"}"#).unwrap();
        assert_eq!(
            by_actor.into_invalidation(),
            Ok(Invalidation::Actor("u1".to_string()))
        );

        let by_key: InvalidateRequest =
            serde_json::from_str(r#"{"resource_key":"perm:abc"}"#).unwrap();
        assert_eq!(
            by_key.into_invalidation(),
            Ok(Invalidation::Key("perm:abc".to_string()))
        );

        let by_resource: InvalidateRequest =
            serde_json::from_str(r#"{"resource_key":"orders"}"#).unwrap();
        assert_eq!(
            by_resource.into_invalidation(),
            Ok(Invalidation::Resource("orders".to_string()))
        );

        let neither: InvalidateRequest = serde_json::from_str("{}").unwrap();
        assert!(neither.into_invalidation().is_err());
    }
}
