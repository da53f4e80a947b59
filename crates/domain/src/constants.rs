//! Protocol constants
//!
//! Header names, file names and defaults shared by the HTTP client and its
//! configuration.

// Request headers
pub const HEADER_CORRELATION_ID: &str = "X-Correlation-ID";
pub const HEADER_CALLER_IDENTITY: &str = "X-Caller-Identity";
pub const HEADER_DPOP: &str = "DPoP";

// Nonce
pub const DEFAULT_NONCE_HEADER: &str = "Replay-Nonce";
pub const NONCE_CACHE_CAPACITY: usize = 64;

// Token storage
pub const AUTH_TOKEN_FILE: &str = ".auth_token";
pub const JWK_FILE_EXTENSION: &str = "jwk";

// Token types
pub const TOKEN_TYPE_BEARER: &str = "Bearer";
pub const TOKEN_TYPE_DPOP: &str = "DPoP";

// Environment
pub const ENV_CLIENTS_CONFIG: &str = "PORTER_CLIENTS_CONFIG";

// Scheduler
pub const DEFAULT_TASK_RUN_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TICKER_INTERVAL_MS: u64 = 1_000;
