mod ask;
mod chat;
mod config;
mod retrieve;
mod serve;
mod shared;
mod status;

pub use ask::AskArgs;
pub use chat::ChatArgs;
pub use config::ConfigCommand;
pub use retrieve::RetrieveArgs;
pub use serve::{ServeArgs, ServeCommand};

pub use ask::handle_ask;
pub use chat::handle_chat;
pub use config::handle_config;
pub use retrieve::handle_retrieve;
pub use serve::handle_serve;
pub use status::handle_status;
