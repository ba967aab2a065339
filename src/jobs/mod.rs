// Job tracking: association, status cache, aggregation and polling

pub mod aggregate;
pub mod association;
pub mod cache;
pub mod poller;

pub use aggregate::{
    aggregate_progress, aggregate_status, AggregateView, Aggregator, CancelReport, HostSection,
    SectionBody,
};
pub use association::{
    generate_group_id, AssociatedJob, HeuristicResolver, JobRecord, JobResolver, JobTracker,
    MasterJob, ResolvedJob, SubmissionFailure, HOST_SPECIFIC_VAR, SINGLE_HOST_EXECUTION_VAR,
};
pub use cache::{OutputCache, OutputCacheEntry};
pub use poller::Poller;
