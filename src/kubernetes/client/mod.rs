pub mod auth;
pub mod config;
mod transport;

pub use config::{Config, Credentials};
pub use transport::Transport;
