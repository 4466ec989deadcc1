pub mod domain;
pub mod ports;
pub mod stage;
pub mod suggestions;

pub use domain::{
    AuthSession, Chapter, CharacterProfile, EnvironmentDetails, Foundation, FoundationMessage,
    GenreDetails, MessageRole, NewFoundationMessage, Story, User, UserCredentials, WorldDetails,
};
pub use ports::{
    ChatSuggestionService, DatabaseService, InterviewService, PortError, PortResult,
    SpeechToTextService, StoryQaService, StoryWriterService, TextToSpeechService,
};
pub use stage::{Stage, StageStatus, UtteranceIntent};
