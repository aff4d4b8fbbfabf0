pub mod api_key_service;
pub mod gate;
pub mod identity_resolver;
pub mod pdf_engine;
pub mod plan_registry;
pub mod quota_ledger;

// Re-export commonly used types
pub use api_key_service::{ApiKeyService, IssuedKey, KeyTarget};
pub use gate::{Admission, Gate};
pub use identity_resolver::{Credentials, IdentityResolver};
pub use pdf_engine::{HttpPdfEngine, OperationTarget, PdfEngine, PdfOperation};
pub use plan_registry::PlanRegistry;
pub use quota_ledger::QuotaLedger;
