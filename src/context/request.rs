//! Request-like ambient state
//!
//! The fields a worker restores before invoking the handler: method, URI,
//! headers, query, cookies, files, session, locale, and the two late-bound
//! resolver tasks for "current route" and "current user". Threaded into
//! workers as an explicit value, never a process-wide singleton.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskRef;

/// Ambient request state snapshotted for workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Names of files attached to the request, by field name.
    pub files: Vec<(String, String)>,
    pub session: Vec<(String, Value)>,
    pub locale: String,
    /// Late-bound resolver for the current route; a task because it closes
    /// over routing state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_resolver: Option<TaskRef>,
    /// Late-bound resolver for the current user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_resolver: Option<TaskRef>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            uri: "/".to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            cookies: Vec::new(),
            files: Vec::new(),
            session: Vec::new(),
            locale: "en".to_string(),
            route_resolver: None,
            user_resolver: None,
        }
    }
}

impl RequestContext {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_session(mut self, key: impl Into<String>, value: Value) -> Self {
        self.session.push((key.into(), value));
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_route_resolver(mut self, resolver: TaskRef) -> Self {
        self.route_resolver = Some(resolver);
        self
    }

    pub fn with_user_resolver(mut self, resolver: TaskRef) -> Self {
        self.user_resolver = Some(resolver);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn session_value(&self, key: &str) -> Option<&Value> {
        self.session.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}
