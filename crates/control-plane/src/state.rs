use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use subtle::ConstantTimeEq;

use crate::{
    config::EnrollmentConfig, events::FleetEventBroadcaster, persistence::FleetRepositoryRef,
    registry::ConnectionRegistry, services::agents::AgentControlPlane,
};

/// Shared application state passed into handlers.
#[derive(Clone)]
pub struct AppState {
    pub control: AgentControlPlane,
    pub repo: FleetRepositoryRef,
    pub registry: ConnectionRegistry,
    pub events: FleetEventBroadcaster,
    pub operator_auth: OperatorAuth,
    pub enrollment: EnrollmentConfig,
    /// Outbound queue depth per agent connection.
    pub agent_outbound_buffer: usize,
    pub metrics_handle: PrometheusHandle,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("enrollment", &self.enrollment)
            .field("agent_outbound_buffer", &self.agent_outbound_buffer)
            .finish_non_exhaustive()
    }
}

/// Operator authentication configuration.
#[derive(Clone)]
pub struct OperatorAuth {
    pub tokens: Vec<String>,
    pub header_name: HeaderName,
}

impl OperatorAuth {
    pub fn is_operator_token(&self, candidate: &str) -> bool {
        self.tokens.iter().any(|token| {
            if token.len() != candidate.len() {
                return false;
            }
            token.as_bytes().ct_eq(candidate.as_bytes()).into()
        })
    }
}

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_auth_checks_exact_tokens() {
        let auth = OperatorAuth {
            tokens: vec!["secret-token".to_string()],
            header_name: HeaderName::from_static("authorization"),
        };

        assert!(auth.is_operator_token("secret-token"));
        assert!(!auth.is_operator_token("secret-token-2"));
        assert!(!auth.is_operator_token("SECRET-TOKEN"));
    }
}
