pub mod identity_repository;
pub mod quota_repository;

pub use identity_repository::IdentityRepository;
pub use quota_repository::{CounterOutcome, QuotaRepository};
