//! # Managed MQTT-over-WebSocket sessions
//!
//! A small async client stack for driving an MQTT 3.1.1 session over a
//! WebSocket-upgraded TLS connection, with a credential-provider chain signing
//! the upgrade request and automatic reconnection on transport interruption.
//!
//! The crate is layered the same way the connection is:
//!
//! - [`endpoint`] resolves a broker URI into host, port and scheme.
//! - [`credentials`] supplies short-lived signing credentials on demand.
//! - [`transport`] owns one WebSocket connection: DNS, TCP, TLS, signed
//!   upgrade, then binary-frame demultiplexing into the packet layer.
//! - [`client`] is the session state machine: CONNECT/CONNACK, packet-id
//!   correlated subscribe/unsubscribe/publish flows, keep-alive pings and
//!   reconnection with backoff.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mqttws::{MqttSession, QoS, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = MqttSession::new(SessionOptions::new("demo-client"));
//!
//!     let result = session.connect("wss://broker.example:443").await?;
//!     println!("connected, session present: {}", result.session_present);
//!
//!     session
//!         .subscribe("sensors/+/data", QoS::AtLeastOnce, |msg| {
//!             println!("{}: {} bytes", msg.topic, msg.payload.len());
//!         })
//!         .await?;
//!
//!     session.publish_qos("sensors/a/data", b"25.5", QoS::AtLeastOnce).await?;
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle events
//!
//! Connection lifecycle notifications are delivered either through registered
//! callbacks or through an ordered event channel, so application logic never
//! has to run on the I/O task:
//!
//! ```rust,no_run
//! # use mqttws::{ConnectionEvent, MqttSession, SessionOptions};
//! # async fn demo(session: &MqttSession) {
//! let mut events = session.event_stream();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ConnectionEvent::Connected { session_present } => {
//!                 println!("connected (session present: {session_present})");
//!             }
//!             ConnectionEvent::Interrupted { reason } => println!("interrupted: {reason}"),
//!             ConnectionEvent::Resumed { session_present } => {
//!                 println!("resumed (session present: {session_present})");
//!             }
//!             ConnectionEvent::Closed => break,
//!         }
//!     }
//! });
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod callback;
pub mod client;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod packet;
pub mod packet_id;
pub mod session;
pub mod test_utils;
pub mod topic;
pub mod transport;
pub mod types;

pub use client::{Connector, MqttSession, MqttSessionBuilder, WebSocketConnector};
pub use credentials::{
    CachingProvider, Credentials, CredentialsProvider, EnvProvider, ProviderChain, StaticProvider,
};
pub use endpoint::{Endpoint, Scheme};
pub use error::{ConnectError, ParseError, Result, SessionError};
pub use events::ConnectionEvent;
pub use packet::publish::Message;
pub use session::{ConnectionState, SubscriptionStatus};
pub use topic::{is_valid_topic_filter, is_valid_topic_name, topic_matches_filter};
pub use transport::{HeaderSigner, TransportType, UpgradeSigner, WebSocketConfig};
pub use types::{ConnectResult, QoS, ReconnectConfig, SessionOptions};
