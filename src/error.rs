//! Error types for the gateway core

use thiserror::Error;

/// Errors produced while registering, selecting or forwarding to service instances
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad registration input. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No registered or healthy instance for the service
    #[error("Service {0} not available")]
    Unavailable(String),

    /// Outbound call exceeded its deadline
    #[error("Service {0} timeout")]
    Timeout(String),

    /// Backend refused the connection or was unreachable
    #[error("Service {0} connection failed")]
    ConnectFailed(String),

    #[error("Internal error forwarding to {service}: {message}")]
    Internal { service: String, message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn internal(service: impl Into<String>, message: impl ToString) -> Self {
        GatewayError::Internal {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// HTTP status the boundary should emit for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidConfig(_) => 500,
            GatewayError::Unavailable(_) => 503,
            GatewayError::Timeout(_) => 504,
            GatewayError::ConnectFailed(_) => 503,
            GatewayError::Internal { .. } => 500,
        }
    }

    /// Message safe to return to a client.
    ///
    /// Internal failures only carry their underlying cause when `expose_details`
    /// is set, which is meant for debugging deployments.
    pub fn client_detail(&self, expose_details: bool) -> String {
        match self {
            GatewayError::Internal { .. } | GatewayError::InvalidConfig(_) if !expose_details => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Unavailable("auth".into()).status_code(), 503);
        assert_eq!(GatewayError::Timeout("auth".into()).status_code(), 504);
        assert_eq!(GatewayError::ConnectFailed("auth".into()).status_code(), 503);
        assert_eq!(GatewayError::internal("auth", "boom").status_code(), 500);
    }

    #[test]
    fn test_internal_detail_is_hidden_unless_exposed() {
        let error = GatewayError::internal("auth", "socket exploded");
        assert_eq!(error.client_detail(false), "Internal server error");
        assert!(error.client_detail(true).contains("socket exploded"));

        let unavailable = GatewayError::Unavailable("chatbot".into());
        assert_eq!(unavailable.client_detail(false), "Service chatbot not available");
    }
}
