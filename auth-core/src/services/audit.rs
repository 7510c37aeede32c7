//! Audit sink - security and compliance event hook.
//!
//! The core emits events; shipping them anywhere durable is an external
//! concern. Recording must never fail the operation that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who performed a mutating operation. There is no ambient default; callers
/// construct `Actor::System` explicitly at the outermost boundary when no
/// human is driving the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uuid),
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

/// A single audit event.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: &'static str,
    pub actor: Actor,
    pub user_id: Option<Uuid>,
    pub client_ip: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub occurred_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &'static str, actor: Actor, occurred_utc: DateTime<Utc>) -> Self {
        Self {
            action,
            actor,
            user_id: None,
            client_ip: None,
            detail: None,
            occurred_utc,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn client_ip(mut self, ip: Option<&str>) -> Self {
        self.client_ip = ip.map(str::to_string);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Sink for audit events. Implementations must swallow their own failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that emits events as structured log lines.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            action = event.action,
            actor = %event.actor,
            user_id = ?event.user_id,
            client_ip = ?event.client_ip,
            detail = ?event.detail,
            occurred_utc = %event.occurred_utc,
            "audit event"
        );
    }
}

/// Sink that drops everything; for tests that don't assert on audit.
#[derive(Debug, Clone, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_renders_without_ambiguity() {
        let id = Uuid::new_v4();
        assert_eq!(Actor::User(id).to_string(), format!("user:{id}"));
        assert_eq!(Actor::System.to_string(), "system");
    }

    #[test]
    fn builder_fills_optional_fields() {
        let id = Uuid::new_v4();
        let event = AuditEvent::new("login", Actor::User(id), Utc::now())
            .user(id)
            .client_ip(Some("203.0.113.7"))
            .detail(serde_json::json!({ "remembered": true }));

        assert_eq!(event.user_id, Some(id));
        assert_eq!(event.client_ip.as_deref(), Some("203.0.113.7"));
        assert!(event.detail.is_some());
    }
}
