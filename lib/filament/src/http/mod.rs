//! HTTP/1.1 wire layer: cache-backed request/response types doubling as
//! builder and incremental parser, plus session/client/server endpoints
//! layering them on the TCP transport.

pub mod cache;
pub mod client;
mod message;
pub mod request;
pub mod response;
pub mod server;
pub mod session;

pub use self::cache::ContentCache;
pub use self::client::{HttpClient, HttpClientHandler};
pub use self::request::HttpRequest;
pub use self::response::{status_phrase, HttpResponse};
pub use self::server::{HttpServer, HttpServerHandler};
pub use self::session::{HttpSession, HttpSessionHandler};
