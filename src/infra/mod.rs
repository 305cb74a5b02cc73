mod actions;
mod backgrounds;
mod cache;
mod config;
mod discovery;
mod documents;
mod git;
mod launcher;
mod logging;
mod mapping_store;
mod paths;
mod registry;
mod session_file;
mod session_index;
mod terminal_settings;
mod validator;

pub use actions::*;
pub use backgrounds::*;
pub use cache::*;
pub use config::*;
pub use discovery::*;
pub use documents::*;
pub use git::*;
pub use launcher::*;
pub use logging::*;
pub use mapping_store::*;
pub use paths::*;
pub use registry::*;
pub use session_file::*;
pub use session_index::*;
pub use terminal_settings::*;
pub use validator::*;
