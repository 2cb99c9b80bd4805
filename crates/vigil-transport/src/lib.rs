//! Vigil cluster transport layer.
//!
//! Mutually authenticated TLS sessions between cluster endpoints, carrying
//! netstring-framed JSON text. The remote endpoint's name is taken from the
//! common name of the certificate it presents.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use vigil_transport::{TlsContext, TransportConfig};
//!
//! # async fn example() -> Result<(), vigil_transport::TransportError> {
//! let tls = TlsContext::load(&TransportConfig::new("node-a.crt", "node-a.key", "ca.crt"))?;
//! println!("I am {}", tls.identity());
//!
//! let mut session = tls.connect("10.0.0.2", 5665, "node-b").await?;
//! session.link().send(r#"{"jsonrpc":"2.0","method":"cluster::HeartBeat"}"#.into()).await?;
//! while let Some(frame) = session.recv().await {
//!     println!("{}: {frame}", session.identity());
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod frame;
mod link;
mod session;
mod tls;

pub use config::TransportConfig;
pub use error::TransportError;
pub use frame::{NetstringCodec, DEFAULT_MAX_FRAME_SIZE};
pub use link::Link;
pub use session::{Role, Session};
pub use tls::{common_name, TlsContext};
