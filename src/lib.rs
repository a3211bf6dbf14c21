pub mod cli;
pub mod common;
pub mod config;
pub mod connections;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod reverse_proxy;
pub mod router;
pub mod server;
pub mod static_files;

pub use config::Config;
pub use connections::{BackendType, Connection};
pub use error::ProxyError;
pub use router::{AppContext, Router};
pub use server::Server;
