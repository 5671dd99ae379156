// Inbound HTTP routers
pub mod api;

// Audit trail of upstream transactions
pub mod audit;

// TOML configuration and environment overrides
pub mod config;

// Upstream client credentials
pub mod credentials;

// Local replica of mirrored resources
pub mod mirror;

// Proxy, audit and mirror orchestration
pub mod pipeline;

// Supported FHIR resource kinds
pub mod resource;

// SQLite database and at-rest encryption
pub mod storage;

// Access token cache and issuer
pub mod token;

// Remote FHIR API client
pub mod upstream;
