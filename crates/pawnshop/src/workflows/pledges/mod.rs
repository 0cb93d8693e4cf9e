//! Pledge lending: tariff resolution, loan pricing, and the ticket lifecycle.

pub mod domain;
pub mod pricing;
pub mod report;
pub mod repository;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod tariffs;

#[cfg(test)]
mod tests;

pub use domain::{
    AuditAction, AuditLogEntry, BranchId, CategoryId, Item, ItemId, Money, NewTariff, PawnTicket,
    Payment, PaymentId, PaymentType, PledgeRequest, RequestId, RequestStatus, RequestSubmission,
    Tariff, TariffId, TicketId, TicketStatus, UserId, ValidationError,
};
pub use pricing::{loan_amount, ransom_amount, LoanTerms, DEFAULT_LOAN_TERM_DAYS};
pub use report::{PortfolioReport, RequestStats, TicketStats};
pub use repository::{
    Clock, LedgerFilter, ManualClock, PledgeStore, PledgeTx, RepositoryError, SystemClock,
};
pub use service::{LendingError, LendingPolicy, LoanQuote, PledgeService};
pub use storage::{MemoryStore, SqliteStore};
pub use sweeper::{ExpirySweeper, SweepSchedule, SweeperStats};
pub use tariffs::{
    resolve as resolve_tariff, ResolutionPhase, ResolvedTariff, SpecificityTier,
    TariffCsvImporter, TariffImportError, TariffQuery,
};
