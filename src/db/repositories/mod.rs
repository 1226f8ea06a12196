pub mod governance_repository;
pub mod log_repository;
pub mod pricing_repository;

pub use governance_repository::GovernanceRepository;
pub use log_repository::{LogFilter, LogRepository, LogUpdate};
pub use pricing_repository::PricingRepository;
