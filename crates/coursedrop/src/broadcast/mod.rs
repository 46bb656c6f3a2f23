//! Real-time job events and the audit trail.

pub mod audit;
pub mod job_progress;
pub mod redis_publisher;

pub use audit::{
    AuditCategory, AuditEntry, AuditError, AuditLevel, AuditSink, HttpAuditLogger,
    LifecycleEvent, LifecycleKind, NoopAudit,
};
pub use job_progress::{
    JobEvent, JobProgressBroadcaster, NoopProgress, OrderComplete, ProgressPublisher,
    ProgressRecord, StatusChange,
};
pub use redis_publisher::RedisProgressPublisher;
