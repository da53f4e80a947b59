//! Conversions from external infrastructure errors into domain errors.

use porter_domain::PorterError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub PorterError);

impl From<InfraError> for PorterError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<PorterError> for InfraError {
    fn from(value: PorterError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoPorterError {
    fn into_porter(self) -> PorterError;
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → PorterError */
/* -------------------------------------------------------------------------- */

impl IntoPorterError for std::io::Error {
    fn into_porter(self) -> PorterError {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::NotFound => PorterError::NotFound(self.to_string()),
            ErrorKind::PermissionDenied => {
                PorterError::Security(format!("permission denied: {self}"))
            }
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                PorterError::InvalidInput(self.to_string())
            }
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => PorterError::Network(self.to_string()),
            _ => PorterError::Internal(self.to_string()),
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        InfraError(value.into_porter())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json / serde_yaml → PorterError */
/* -------------------------------------------------------------------------- */

impl IntoPorterError for serde_json::Error {
    fn into_porter(self) -> PorterError {
        if self.is_io() {
            return PorterError::Internal(format!("JSON I/O error: {self}"));
        }
        PorterError::Config(format!("Invalid JSON format: {self}"))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(value.into_porter())
    }
}

impl IntoPorterError for serde_yaml::Error {
    fn into_porter(self) -> PorterError {
        match self.location() {
            Some(at) => PorterError::Config(format!(
                "Invalid YAML format at line {} column {}: {self}",
                at.line(),
                at.column()
            )),
            None => PorterError::Config(format!("Invalid YAML format: {self}")),
        }
    }
}

impl From<serde_yaml::Error> for InfraError {
    fn from(value: serde_yaml::Error) -> Self {
        InfraError(value.into_porter())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → PorterError */
/* -------------------------------------------------------------------------- */

impl IntoPorterError for reqwest::Error {
    fn into_porter(self) -> PorterError {
        if self.is_timeout() {
            return PorterError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return PorterError::Network("HTTP connection failure".into());
        }

        if self.is_builder() {
            return PorterError::Config(format!("HTTP client configuration: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => PorterError::Auth(message),
                404 => PorterError::NotFound(message),
                429 => PorterError::Network(message),
                400..=499 => PorterError::InvalidInput(message),
                _ => PorterError::Network(message),
            };
        }

        PorterError::Network(self.to_string())
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(value: reqwest::Error) -> Self {
        InfraError(value.into_porter())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "clients.yaml");
        let mapped: PorterError = InfraError::from(err).into();
        match mapped {
            PorterError::NotFound(msg) => assert!(msg.contains("clients.yaml")),
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn yaml_errors_carry_location() {
        let err = serde_yaml::from_str::<porter_domain::FactoryConfig>("clients: [").unwrap_err();
        let mapped: PorterError = InfraError::from(err).into();
        match mapped {
            PorterError::Config(msg) => assert!(msg.contains("YAML")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn json_syntax_maps_to_config() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let mapped: PorterError = InfraError::from(err).into();
        assert!(matches!(mapped, PorterError::Config(_)));
    }

    #[tokio::test]
    async fn http_status_401_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::UNAUTHORIZED))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        let mapped: PorterError = InfraError::from(error).into();
        match mapped {
            PorterError::Auth(msg) => assert!(msg.contains("401")),
            other => panic!("expected auth error, got {:?}", other),
        }
    }
}
