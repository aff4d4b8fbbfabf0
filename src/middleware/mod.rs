pub mod admin_auth;
pub mod credentials;
pub mod gate_middleware;

pub use admin_auth::AdminAccess;
pub use credentials::{extract_api_key, extract_credentials};
pub use gate_middleware::GateMiddleware;
