pub mod candidate_flow;
pub mod triple_ctx;

pub use candidate_flow::CandidateFlow;
pub use triple_ctx::TripleCtx;
