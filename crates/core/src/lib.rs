//! # stream-engine — managed non-blocking TCP session engine
//!
//! A reusable, single-threaded transport component: it accepts inbound TCP
//! connections, initiates outbound ones, buffers their bidirectional byte
//! streams, and drives each through a small state machine, cooperating with
//! user-supplied protocol logic via callbacks. It is meant as the transport
//! substrate underneath ancillary daemon services — a CLI/telnet control
//! interface, an HTTP-like management endpoint, a router-control session —
//! not as a protocol implementation in its own right.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Engine         — registry, dispatch loop     │
//! ├───────────────────────────────────────────────┤
//! │  ManagedEndpoint — reconcilable v4/v6 pair     │
//! │  Listener        — bound socket, session slab  │
//! ├───────────────────────────────────────────────┤
//! │  Session        — state machine, buffers      │
//! ├───────────────────────────────────────────────┤
//! │  Reactor        — mio-backed readiness source  │
//! │  TimerWheel     — heap-based idle timeouts     │
//! │  Acl            — peer accept/reject predicate │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_engine::{Engine, ListenerConfig, Session, SessionHandler, SessionState};
//!
//! struct Echo;
//! impl SessionHandler for Echo {
//!     fn receive_data(&self, session: &mut Session) -> SessionState {
//!         let data = session.input().as_slice().to_vec();
//!         session.output_mut().extend(&data);
//!         session.input_mut().clear();
//!         SessionState::Active
//!     }
//! }
//!
//! let mut engine = Engine::init().unwrap();
//! engine
//!     .add_listener("127.0.0.1:0".parse().unwrap(), ListenerConfig::default(), Arc::new(Echo))
//!     .unwrap();
//! loop {
//!     engine.turn(None).unwrap();
//!     break; // demonstration only
//! }
//! ```
//!
//! ## Crate layout
//!
//! - [`engine`] — [`Engine`], the process-wide listener registry and dispatch loop.
//! - [`listener`] — [`Listener`] and [`ListenerConfig`].
//! - [`managed`] — [`ManagedEndpoint`] and [`ManagedEndpointConfig`] (v4/v6 reconciliation).
//! - [`session`] — [`Session`], [`SessionState`], [`SessionHandler`].
//! - [`reactor`] — [`Reactor`] trait and the default mio-backed implementation.
//! - [`timer`] — [`TimerWheel`] trait and the default heap-backed implementation.
//! - [`buffer`] — [`SessionBuffer`], the growable byte queue backing session I/O.
//! - [`acl`] — [`Acl`] trait and the bundled [`AllowDenyList`].
//! - [`error`] — [`EngineError`] enum and [`Result`] alias.

pub mod acl;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod listener;
pub mod managed;
pub mod reactor;
pub mod session;
pub mod timer;

pub use acl::{Acl, AllowDenyList};
pub use buffer::SessionBuffer;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use listener::{Listener, ListenerConfig};
pub use managed::{ManagedEndpoint, ManagedEndpointConfig};
pub use reactor::{MioReactor, Reactor};
pub use session::{ErrorCode, ListenerKey, Session, SessionHandler, SessionKey, SessionState};
pub use timer::{ClassId, TimerId, TimerWheel, WheelTimer};
