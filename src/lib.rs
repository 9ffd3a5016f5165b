//! # bosswave-client
//!
//! Async Rust client for the Bosswave publish/subscribe overlay protocol.
//!
//! The client speaks the router's text-header, length-prefixed binary frame
//! format over a persistent TCP connection and correlates asynchronous
//! replies and subscription results with in-flight requests by sequence
//! number.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): encodes and decodes wire frames and
//!   their typed binary objects.
//! - **Writer task**: all frame writes funnel through one task, so
//!   concurrent publishers never interleave bytes on the wire.
//! - **Dispatch loop**: one background reader decodes frames and invokes
//!   the handler registered under the frame's sequence number.
//!
//! ## Example
//!
//! ```ignore
//! use bosswave_client::{BosswaveClient, SubscribeRequest};
//!
//! #[tokio::main]
//! async fn main() -> bosswave_client::Result<()> {
//!     let client = BosswaveClient::connect("localhost", 28589).await?;
//!     let request = SubscribeRequest::builder("scratch/+").build();
//!     client
//!         .subscribe(
//!             &request,
//!             |response| println!("subscribed: {}", response.status),
//!             |message| println!("{}: {} objects",
//!                 message.uri,
//!                 message.payload_objects.map_or(0, |p| p.len())),
//!         )
//!         .await?;
//!     client.wait_for_shutdown().await
//! }
//! ```

pub mod error;
pub mod handler;
pub mod protocol;
pub mod request;

mod client;
mod writer;

pub use client::BosswaveClient;
pub use error::{BosswaveError, Result};
pub use handler::{Message, Response, STATUS_OKAY};
pub use protocol::{Command, Frame, ObjectType, PayloadObject, RoutingObject};
pub use request::{
    ChainElaborationLevel, PublishRequest, PublishRequestBuilder, SubscribeRequest,
    SubscribeRequestBuilder,
};
