//! Query requests and the identity of whoever submitted them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors building a [`QueryRequest`] or [`ActorIdentity`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("either a user id or a session id is required")]
    MissingActor,

    #[error("a request carries a user id or a session id, not both")]
    AmbiguousActor,

    #[error("assignment id is required")]
    MissingAssignment,
}

/// Who submitted a query: an authenticated user or an anonymous browser session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ActorIdentity {
    User(String),
    Session(String),
}

impl ActorIdentity {
    /// Build from the two optional identifiers a caller may carry. Blank
    /// values count as absent; exactly one must remain.
    pub fn from_parts(
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Self, RequestError> {
        let user_id = user_id.map(str::trim).filter(|id| !id.is_empty());
        let session_id = session_id.map(str::trim).filter(|id| !id.is_empty());
        match (user_id, session_id) {
            (Some(user), None) => Ok(ActorIdentity::User(user.to_string())),
            (None, Some(session)) => Ok(ActorIdentity::Session(session.to_string())),
            (Some(_), Some(_)) => Err(RequestError::AmbiguousActor),
            (None, None) => Err(RequestError::MissingActor),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            ActorIdentity::User(id) => Some(id),
            ActorIdentity::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ActorIdentity::User(_) => None,
            ActorIdentity::Session(id) => Some(id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ActorIdentity::User(_))
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorIdentity::User(id) => write!(f, "user:{id}"),
            ActorIdentity::Session(id) => write!(f, "session:{id}"),
        }
    }
}

/// One submission of raw query text against an assignment.
///
/// The text is kept exactly as received; validation happens in the engine so
/// that rejected inputs still produce an outcome and an attempt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    query: String,
    assignment_id: String,
    actor: ActorIdentity,
}

impl QueryRequest {
    pub fn new(
        query: impl Into<String>,
        assignment_id: impl Into<String>,
        actor: ActorIdentity,
    ) -> Result<Self, RequestError> {
        let assignment_id = assignment_id.into();
        if assignment_id.trim().is_empty() {
            return Err(RequestError::MissingAssignment);
        }
        Ok(QueryRequest {
            query: query.into(),
            assignment_id,
            actor,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn assignment_id(&self) -> &str {
        &self.assignment_id
    }

    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_exactly_one() {
        assert_eq!(
            ActorIdentity::from_parts(Some("u1"), None),
            Ok(ActorIdentity::User("u1".to_string()))
        );
        assert_eq!(
            ActorIdentity::from_parts(None, Some("s1")),
            Ok(ActorIdentity::Session("s1".to_string()))
        );
        assert_eq!(
            ActorIdentity::from_parts(Some("u1"), Some("s1")),
            Err(RequestError::AmbiguousActor)
        );
        assert_eq!(
            ActorIdentity::from_parts(None, None),
            Err(RequestError::MissingActor)
        );
    }

    #[test]
    fn test_blank_ids_count_as_absent() {
        assert_eq!(
            ActorIdentity::from_parts(Some("  "), Some("s1")),
            Ok(ActorIdentity::Session("s1".to_string()))
        );
        assert_eq!(
            ActorIdentity::from_parts(Some(""), Some("")),
            Err(RequestError::MissingActor)
        );
    }

    #[test]
    fn test_request_requires_assignment() {
        let actor = ActorIdentity::User("u1".to_string());
        assert_eq!(
            QueryRequest::new("SELECT 1", " ", actor.clone()),
            Err(RequestError::MissingAssignment)
        );
        let req = QueryRequest::new("SELECT 1", "a1", actor).unwrap();
        assert_eq!(req.query(), "SELECT 1");
        assert_eq!(req.assignment_id(), "a1");
        assert!(req.actor().is_authenticated());
    }

    #[test]
    fn test_actor_serde_shape() {
        let json = serde_json::to_string(&ActorIdentity::Session("abc".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"session","id":"abc"}"#);
    }
}
