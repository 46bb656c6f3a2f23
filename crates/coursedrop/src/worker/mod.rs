pub mod consumer;
pub mod job;
pub mod queue;

pub use consumer::{PollOutcome, QueueConsumer};
pub use job::{parse_payload, Job, JobResult, QueuePayload};
pub use queue::{JobQueue, QueueError, RedisJobQueue};
