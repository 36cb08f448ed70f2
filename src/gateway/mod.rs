//! Request path of the gateway: client identity, upstream client, proxy
//! orchestration and the HTTP server.

pub mod identity;
pub mod proxy;
pub mod server;
pub mod upstream;

pub use proxy::{GatewayStats, ProxyGateway, ProxyResponse};
pub use server::{build_router, GatewayServer, ServerState};
pub use upstream::UpstreamClient;
