pub mod analysis;
pub mod chat;
pub mod customers;
pub mod documents;
pub mod domain;
pub mod feed;
pub mod intake;
pub mod message_log;
pub mod ports;
pub mod profile;
pub mod progress;
pub mod requirements;
pub mod responder;
pub mod retry;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use analysis::{AnalysisError, DocumentAnalyzer};
pub use chat::ChatService;
pub use customers::CustomerDirectory;
pub use documents::{DocumentService, SubmitError};
pub use domain::{
    ChatMessage, Conversation, Document, Role, SenderType, StepStatus, User, UserCredentials,
    UserProfile,
};
pub use feed::{ChangeFeed, MessageEvent};
pub use intake::IntakeError;
pub use ports::{
    BlobStorage, ChatResponderService, DatabaseService, DocumentClassificationService,
    LanguageDetectionService, PortError, PortResult, TextExtractionService,
};
pub use profile::ProfileService;
pub use progress::ProgressService;
pub use responder::AutoResponder;
pub use retry::{retry_if, RetryPolicy};
