pub mod answer_matcher;
pub mod assist_service;
pub mod block_extractor;
pub mod image_associator;
pub mod issue_writer;
pub mod metadata_resolver;
pub mod segmenter;

pub use answer_matcher::{AnswerMatcher, Correction, MatchOutcome, MatchResult};
pub use assist_service::{AssistRequest, AssistResolver, AssistService, AssistSuggestion};
pub use block_extractor::BlockExtractor;
pub use image_associator::ImageAssignment;
pub use issue_writer::IssueWriter;
pub use metadata_resolver::MetadataResolver;
pub use segmenter::Segmenter;
