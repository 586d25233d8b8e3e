//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection chat session state.

use crate::config::Config;
use residency_core::domain::{Conversation, User};
use residency_core::message_log::MessageLog;
use residency_core::ports::{
    BlobStorage, ChatResponderService, DatabaseService, DocumentClassificationService,
    LanguageDetectionService, TextExtractionService,
};
use residency_core::{
    AutoResponder, ChangeFeed, ChatService, CustomerDirectory, DocumentAnalyzer, DocumentService,
    ProfileService, ProgressService,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The concrete collaborators the use-cases are wired to.
pub struct Adapters {
    pub db: Arc<dyn DatabaseService>,
    pub storage: Arc<dyn BlobStorage>,
    pub extractor: Arc<dyn TextExtractionService>,
    pub language: Arc<dyn LanguageDetectionService>,
    pub classifier: Arc<dyn DocumentClassificationService>,
    pub bot: Arc<dyn ChatResponderService>,
}

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub documents: DocumentService,
    pub progress: ProgressService,
    pub chat: ChatService,
    pub responder: AutoResponder,
    pub profiles: ProfileService,
    pub customers: CustomerDirectory,
    /// Cancelled on shutdown; open WebSocket sessions watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Arc<Config>, adapters: Adapters) -> Self {
        let Adapters {
            db,
            storage,
            extractor,
            language,
            classifier,
            bot,
        } = adapters;

        let analyzer = DocumentAnalyzer::new(extractor, language, classifier);
        let chat = ChatService::new(db.clone(), Arc::new(ChangeFeed::default()));

        Self {
            documents: DocumentService::new(
                db.clone(),
                storage,
                analyzer,
                config.signed_url_ttl,
            ),
            progress: ProgressService::new(db.clone()),
            responder: AutoResponder::new(db.clone(), chat.clone(), bot),
            profiles: ProfileService::new(db.clone()),
            customers: CustomerDirectory::new(db.clone()),
            chat,
            db,
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active chat WebSocket connection.
pub struct SessionState {
    pub user: User,
    pub conversation: Conversation,
    /// Everything this connection has seen, merged from history, the feed and its own sends.
    pub log: MessageLog,
}

impl SessionState {
    pub fn new(user: User, conversation: Conversation) -> Self {
        Self {
            user,
            conversation,
            log: MessageLog::new(),
        }
    }

    pub fn is_agency(&self) -> bool {
        self.user.is_agency()
    }
}
