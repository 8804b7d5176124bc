pub mod audit;
pub mod job;
pub mod lifecycle;
pub mod queue;

pub use audit::{AuditLogEntry, AuditOperation, SYSTEM_OPERATOR};
pub use job::{
    BenchParams, Instance, InstanceId, Job, JobId, JobRunRecord, NewJob, RunPayload, Schedule,
};
pub use lifecycle::{JobStatus, Transition};
pub use queue::{JobStore, MemoryJobStore};
