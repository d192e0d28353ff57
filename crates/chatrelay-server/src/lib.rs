//! ChatRelay server — WebSocket relay streaming LLM output to clients.

pub mod relay;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
