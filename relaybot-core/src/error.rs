//! Error types for relaybot.
//!
//! Uses `thiserror` for public API error types with structured variants,
//! one enum per collaborator plus configuration.

/// Errors from chat platform interactions.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Gateway error: {message}")]
    Gateway { message: String },

    /// The gateway closed the session with a code that rules out reconnecting.
    #[error("Gateway closed with {code}: {reason}")]
    GatewayClosed { code: u16, reason: String },
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider returned no choices")]
    EmptyResponse,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_platform() {
        let err = PlatformError::Api {
            status: 403,
            message: "Missing Access".into(),
        };
        assert_eq!(err.to_string(), "API returned 403: Missing Access");
        let err = PlatformError::GatewayClosed {
            code: 4014,
            reason: "Disallowed intents".into(),
        };
        assert_eq!(err.to_string(), "Gateway closed with 4014: Disallowed intents");
    }

    #[test]
    fn test_error_display_llm() {
        let err = LlmError::ApiRequest {
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "API request failed: connection refused");
    }

    #[test]
    fn test_error_display_config() {
        let err = ConfigError::MissingField {
            field: "discord.token".into(),
        };
        assert_eq!(err.to_string(), "Missing required field: discord.token");
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 20,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 20s");
        assert_eq!(LlmError::EmptyResponse.to_string(), "Provider returned no choices");
    }
}
