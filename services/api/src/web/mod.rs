pub mod auth;
pub mod interview;
pub mod middleware;
pub mod protocol;
pub mod qa_task;
pub mod reader_session;
pub mod reading_task;
pub mod rest;
pub mod state;
pub mod voice_session;

// Re-export the WebSocket handlers to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use reader_session::reader_ws_handler;
pub use voice_session::voice_ws_handler;
