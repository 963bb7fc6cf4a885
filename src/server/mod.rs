pub mod config;
mod http_layers;
pub mod metrics;
mod scan_routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub(self) use scan_routes::make_scan_routes;
pub use server::{make_app, run_server};
