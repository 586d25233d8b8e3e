pub mod bot_llm;
pub mod classify_llm;
pub mod db;
pub mod language_llm;
mod openai_json;
pub mod storage;
pub mod vision;

pub use bot_llm::OpenAiBotAdapter;
pub use classify_llm::OpenAiClassifierAdapter;
pub use db::DbAdapter;
pub use language_llm::OpenAiLanguageAdapter;
pub use storage::StorageAdapter;
pub use vision::GoogleVisionAdapter;
