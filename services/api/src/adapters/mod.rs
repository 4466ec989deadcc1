pub mod db;
pub mod elevenlabs_tts;
pub mod interview_llm;
pub mod story_qa_llm;
pub mod stt;
pub mod suggestions_llm;
pub mod tts;
pub mod writer_llm;

pub use db::DbAdapter;
pub use elevenlabs_tts::ElevenLabsTtsAdapter;
pub use interview_llm::OpenAiInterviewAdapter;
pub use story_qa_llm::OpenAiStoryQaAdapter;
pub use stt::OpenAiSttAdapter;
pub use suggestions_llm::OpenAiSuggestionAdapter;
pub use tts::OpenAiTtsAdapter;
pub use writer_llm::OpenAiWriterAdapter;
