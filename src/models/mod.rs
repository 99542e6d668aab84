pub mod block;
pub mod issue;
pub mod metadata;
pub mod question;
pub mod subject;

pub use block::{Block, BlockKind, BoundingBox, ImageBlob, PageContent, TextRun};
pub use issue::{Issue, IssueKind, IssueReport};
pub use metadata::ExamMetadata;
pub use question::{
    question_fingerprint, AnswerEntry, Confidence, ImageAsset, QuestionCandidate, QuestionOption,
    StructuredQuestion,
};
pub use subject::Subject;
