pub mod client;
pub mod retry;
pub mod wqb_client;

pub use client::{
    AlphaMetrics, AlphaRecord, CallError, CandidateFilter, CheckReply, FieldRecord, FieldScope,
    Pagination, Progress, RemoteJobClient, SubmitAccepted,
};
pub use retry::{Resilient, RetryPolicy};
pub use wqb_client::WqbClient;
