mod event_handler;
mod render;
mod state;

pub use event_handler::handle_console_event;
pub use state::{ConsoleEvent, Session};
