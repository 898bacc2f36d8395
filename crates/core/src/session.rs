//! A single managed TCP connection and its state machine.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::buffer::SessionBuffer;
use crate::reactor::{InterestState, Reactor};
use crate::timer::{ClassId, TimerId, TimerWheel};

slotmap::new_key_type! {
    pub struct SessionKey;
}

slotmap::new_key_type! {
    pub struct ListenerKey;
}

/// Where a session currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    SendAndQuit,
    Cleanup,
}

/// Informational error codes reported to [`SessionHandler::create_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ServiceUnavailable,
    RequestTooLarge,
}

/// User-supplied protocol logic plugged into every session created by a
/// listener. All methods have no-op defaults except [`receive_data`], which
/// is the only one without one — a session whose handler never overrides it
/// never leaves [`SessionState::Active`] on its own.
///
/// [`receive_data`]: SessionHandler::receive_data
pub trait SessionHandler: Send + Sync {
    /// Fires once after admission. An `Err` return tears the session down
    /// without invoking [`cleanup`](Self::cleanup).
    fn init(&self, _session: &mut Session) -> crate::error::Result<()> {
        Ok(())
    }

    /// Invoked whenever the input buffer is non-empty, or once up front if
    /// [`send_first`](Self::send_first) is `true`. Returns the session's
    /// next state.
    fn receive_data(&self, session: &mut Session) -> SessionState;

    /// Informational callback for overflow/quota conditions. Must only
    /// schedule output via `session.output_mut()`, never mutate state.
    fn create_error(&self, _session: &mut Session, _code: ErrorCode) {}

    /// Final user-visible callback, invoked at most once per session.
    fn cleanup(&self, _session: &Session) {}

    /// Whether new sessions should get one `receive_data` call with an
    /// empty input buffer before any bytes have arrived (e.g. to emit a
    /// greeting).
    fn send_first(&self) -> bool {
        false
    }
}

/// A live, managed TCP connection.
pub struct Session {
    key: SessionKey,
    listener: ListenerKey,
    peer: SocketAddr,
    stream: TcpStream,
    token: Token,
    interest: InterestState,
    input: SessionBuffer,
    output: SessionBuffer,
    state: SessionState,
    wait_for_connect: bool,
    send_first_pending: bool,
    max_input_buffer: usize,
    idle_timeout: Duration,
    idle_timer: Option<TimerId>,
    idle_timer_class: ClassId,
    handler: Arc<dyn SessionHandler>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: SessionKey,
        listener: ListenerKey,
        peer: SocketAddr,
        stream: TcpStream,
        token: Token,
        max_input_buffer: usize,
        idle_timeout: Duration,
        idle_timer_class: ClassId,
        wait_for_connect: bool,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        let send_first_pending = handler.send_first();
        Self {
            key,
            listener,
            peer,
            stream,
            token,
            interest: InterestState::new(Interest::READABLE.add(Interest::WRITABLE)),
            input: SessionBuffer::with_capacity(1024),
            output: SessionBuffer::default(),
            state: SessionState::Active,
            wait_for_connect,
            send_first_pending,
            max_input_buffer,
            idle_timeout,
            idle_timer: None,
            idle_timer_class,
            handler,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn listener(&self) -> ListenerKey {
        self.listener
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn input(&self) -> &SessionBuffer {
        &self.input
    }

    /// Mutable access so `receive_data` can drop the bytes it has consumed
    /// (e.g. `advance(n)` past one parsed message, or `clear()` for a
    /// handler that consumes everything each call).
    pub fn input_mut(&mut self) -> &mut SessionBuffer {
        &mut self.input
    }

    /// Appends bytes for the socket to write out. Callbacks use this to
    /// schedule output; the write phase of the event handler drains it.
    pub fn output_mut(&mut self) -> &mut SessionBuffer {
        &mut self.output
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn idle_timer_id(&self) -> Option<TimerId> {
        self.idle_timer
    }

    fn reset_idle_timer(&mut self, timers: &mut dyn TimerWheel, now: Instant) {
        if self.idle_timeout.is_zero() {
            return;
        }
        self.idle_timer = Some(timers.set(
            self.idle_timer,
            self.idle_timeout,
            self.idle_timer_class,
            now,
        ));
    }

    pub(crate) fn arm_idle_timer(&mut self, timers: &mut dyn TimerWheel, now: Instant) {
        if !self.idle_timeout.is_zero() {
            self.idle_timer = Some(timers.start(self.idle_timer_class, self.idle_timeout, now));
        }
    }

    pub(crate) fn stop_idle_timer(&mut self, timers: &mut dyn TimerWheel) {
        if let Some(id) = self.idle_timer.take() {
            timers.stop(id);
        }
    }

    pub(crate) fn invoke_init(&mut self) -> crate::error::Result<()> {
        let handler = self.handler.clone();
        handler.init(self)
    }

    pub(crate) fn invoke_cleanup(&self) {
        self.handler.cleanup(self);
    }

    /// Runs the connected-readiness phases for one reactor dispatch:
    /// deferred-connect resolution, read, parse, write, drain bookkeeping.
    /// Returns `true` once the session has reached [`SessionState::Cleanup`]
    /// and should be torn down by the caller.
    pub(crate) fn on_ready(
        &mut self,
        readable: bool,
        writable: bool,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
        now: Instant,
    ) -> bool {
        if self.wait_for_connect {
            if !writable {
                return false;
            }
            match socket2::SockRef::from(&self.stream).take_error() {
                Ok(None) => self.wait_for_connect = false,
                Ok(Some(_)) | Err(_) => {
                    self.state = SessionState::Cleanup;
                    return self.teardown(timers);
                }
            }
            if self.wait_for_connect {
                return false;
            }
        }

        if self.state == SessionState::Active && readable {
            self.read_phase(timers, now);
        }

        if self.state == SessionState::Active {
            let should_parse = !self.input.is_empty() || self.send_first_pending;
            if should_parse {
                self.send_first_pending = false;
                let handler = self.handler.clone();
                self.state = handler.receive_data(self);
            }
        }

        if self.state != SessionState::Cleanup && !self.output.is_empty() {
            if writable {
                self.write_phase(timers, now);
            } else {
                let token = self.token;
                let _ = self
                    .interest
                    .enable_writable(reactor, &mut self.stream, token);
            }
        }

        if self.output.is_empty() {
            let token = self.token;
            let _ = self
                .interest
                .disable_writable(reactor, &mut self.stream, token);
            if self.state == SessionState::SendAndQuit {
                self.state = SessionState::Cleanup;
            }
        }

        if self.state == SessionState::Cleanup {
            return self.teardown(timers);
        }
        false
    }

    fn read_phase(&mut self, timers: &mut dyn TimerWheel, now: Instant) {
        let mut scratch = [0u8; 1024];
        match self.stream.read(&mut scratch) {
            Ok(0) => self.state = SessionState::SendAndQuit,
            Ok(n) => {
                self.input.extend(&scratch[..n]);
                if self.input.len() > self.max_input_buffer {
                    let handler = self.handler.clone();
                    handler.create_error(self, ErrorCode::RequestTooLarge);
                    self.state = SessionState::SendAndQuit;
                } else {
                    self.reset_idle_timer(timers, now);
                }
            }
            Err(e) if is_transient(&e) => {}
            Err(_) => self.state = SessionState::Cleanup,
        }
    }

    fn write_phase(&mut self, timers: &mut dyn TimerWheel, now: Instant) {
        match self.stream.write(self.output.as_slice()) {
            Ok(n) => {
                self.output.advance(n);
                self.reset_idle_timer(timers, now);
            }
            Err(e) if is_transient(&e) => {}
            Err(_) => self.state = SessionState::Cleanup,
        }
    }

    /// Stops the idle timer; the caller (the owning [`crate::listener::Listener`])
    /// performs reactor deregistration, `cleanup` invocation, and slab removal.
    fn teardown(&mut self, timers: &mut dyn TimerWheel) -> bool {
        self.stop_idle_timer(timers);
        true
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_equality() {
        assert_eq!(ErrorCode::RequestTooLarge, ErrorCode::RequestTooLarge);
        assert_ne!(ErrorCode::RequestTooLarge, ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn default_handler_has_noop_callbacks() {
        struct Bare;
        impl SessionHandler for Bare {
            fn receive_data(&self, _session: &mut Session) -> SessionState {
                SessionState::Active
            }
        }
        assert!(!Bare.send_first());
    }
}
