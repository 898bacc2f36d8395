//! A bound TCP socket in listen mode plus the sessions it has accepted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Interest, Token};
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::acl::Acl;
use crate::error::{EngineError, Result};
use crate::reactor::Reactor;
use crate::session::{ErrorCode, Session, SessionHandler, SessionKey, SessionState};
use crate::timer::{ClassId, TimerWheel};

/// Tunable limits and policy for one listener. Callbacks are supplied
/// separately (see [`Listener::new`]) since a handler is mandatory, not a
/// defaultable tunable.
#[derive(Clone)]
pub struct ListenerConfig {
    /// Remaining admission quota. Decremented unconditionally on every
    /// admission (over-quota included — the original's signed counter can
    /// go negative here), incremented on every close — this field doubles
    /// as both the limit and the live counter.
    pub allowed_sessions: i64,
    pub max_input_buffer: usize,
    /// `Duration::ZERO` disables the per-session idle timer.
    pub session_timeout: Duration,
    pub acl: Option<Arc<dyn Acl>>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            allowed_sessions: 10,
            max_input_buffer: 65536,
            session_timeout: Duration::ZERO,
            acl: None,
        }
    }
}

impl ListenerConfig {
    pub fn with_allowed_sessions(mut self, n: u32) -> Self {
        self.allowed_sessions = n as i64;
        self
    }

    pub fn with_max_input_buffer(mut self, n: usize) -> Self {
        self.max_input_buffer = n;
        self
    }

    pub fn with_session_timeout(mut self, d: Duration) -> Self {
        self.session_timeout = d;
        self
    }

    pub fn with_acl(mut self, acl: Arc<dyn Acl>) -> Self {
        self.acl = Some(acl);
        self
    }
}

/// A listening socket and the sessions accepted through it.
pub struct Listener {
    local_addr: SocketAddr,
    socket: MioTcpListener,
    token: Token,
    config: ListenerConfig,
    handler: Arc<dyn SessionHandler>,
    idle_timer_class: ClassId,
    sessions: SlotMap<SessionKey, Session>,
}

impl Listener {
    pub(crate) fn bind(
        addr: SocketAddr,
        config: ListenerConfig,
        handler: Arc<dyn SessionHandler>,
        token: Token,
        reactor: &mut dyn Reactor,
        idle_timer_class: ClassId,
    ) -> Result<Self> {
        let mut socket = MioTcpListener::bind(addr).map_err(|source| EngineError::BindFailed {
            addr,
            source,
        })?;
        let local_addr = socket.local_addr()?;
        reactor.register(&mut socket, token, Interest::READABLE)?;
        Ok(Self {
            local_addr,
            socket,
            token,
            config,
            handler,
            idle_timer_class,
            sessions: SlotMap::with_key(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn session(&self, key: SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn session_mut(&mut self, key: SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn sessions_mut(&mut self) -> &mut SlotMap<SessionKey, Session> {
        &mut self.sessions
    }

    pub(crate) fn sessions_iter(&self) -> impl Iterator<Item = (SessionKey, &Session)> {
        self.sessions.iter()
    }

    pub(crate) fn teardown(
        &mut self,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
    ) -> io::Result<()> {
        let keys: Vec<SessionKey> = self.sessions.keys().collect();
        for key in keys {
            self.close_session(key, reactor, timers);
        }
        reactor.deregister(&mut self.socket)?;
        Ok(())
    }

    /// Accepts every pending connection on this listener's fd (reactor
    /// delivered READ readiness), ACL-filters, and admits each through
    /// [`Listener::create_session`].
    pub(crate) fn accept(
        &mut self,
        listener_key: crate::session::ListenerKey,
        next_token: &mut impl FnMut() -> Token,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
        now: Instant,
    ) -> Vec<SessionKey> {
        let mut admitted = Vec::new();
        loop {
            let (stream, peer) = match self.socket.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(listener = %self.local_addr, error = %e, "accept failed");
                    break;
                }
            };

            if let Some(acl) = &self.config.acl {
                if !acl.accept(peer.ip()) {
                    debug!(peer = %peer, "connection rejected by acl");
                    drop(stream);
                    continue;
                }
            }

            let token = next_token();
            match self.create_session(
                listener_key,
                stream,
                peer,
                token,
                false,
                reactor,
                timers,
                now,
            ) {
                Ok(Some(key)) => admitted.push(key),
                Ok(None) => {}
                Err(e) => warn!(peer = %peer, error = %e, "failed to admit session"),
            }
        }
        admitted
    }

    /// Initiates a non-blocking outbound connection and admits it through
    /// the same [`Listener::create_session`] path as an accepted one, with
    /// `wait_for_connect` set so the connected-readiness handler resolves
    /// the connect result on the first WRITABLE event.
    pub(crate) fn connect_to(
        &mut self,
        listener_key: crate::session::ListenerKey,
        remote_addr: SocketAddr,
        token: Token,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
        now: Instant,
    ) -> Result<Option<SessionKey>> {
        let stream = MioTcpStream::connect(remote_addr)?;
        self.create_session(
            listener_key,
            stream,
            remote_addr,
            token,
            true,
            reactor,
            timers,
            now,
        )
    }

    /// Common admission path shared by the accept loop and outbound
    /// `connect_to`: registers the fd, applies the quota, arms the idle
    /// timer, and invokes `init`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_session(
        &mut self,
        listener_key: crate::session::ListenerKey,
        mut stream: MioTcpStream,
        peer: SocketAddr,
        token: Token,
        wait_for_connect: bool,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
        now: Instant,
    ) -> Result<Option<SessionKey>> {
        reactor.register(
            &mut stream,
            token,
            Interest::READABLE.add(Interest::WRITABLE),
        )?;

        let key = self.sessions.insert_with_key(|key| {
            Session::new(
                key,
                listener_key,
                peer,
                stream,
                token,
                self.config.max_input_buffer,
                self.config.session_timeout,
                self.idle_timer_class,
                wait_for_connect,
                self.handler.clone(),
            )
        });

        let admitted = self.config.allowed_sessions > 0;
        self.config.allowed_sessions -= 1;
        if !admitted {
            let session = self.sessions.get_mut(key).expect("just inserted");
            self.handler.create_error(session, ErrorCode::ServiceUnavailable);
            session.set_state(SessionState::SendAndQuit);
        }

        if let Some(session) = self.sessions.get_mut(key) {
            session.arm_idle_timer(timers, now);
        }

        if admitted {
            let session = self.sessions.get_mut(key).expect("just inserted");
            if let Err(e) = session.invoke_init() {
                warn!(peer = %peer, error = %e, "session init failed");
                self.drop_session_without_cleanup(key, reactor, timers);
                return Ok(None);
            }
        }

        Ok(Some(key))
    }

    /// Tears a session down: stops its timer, invokes `cleanup`,
    /// deregisters its fd, and frees its slab slot. Called exactly once per
    /// session, either from here (normal drain-to-`Cleanup` path) or from
    /// `drop_session_without_cleanup` (failed `init`).
    pub(crate) fn close_session(
        &mut self,
        key: SessionKey,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
    ) {
        let Some(mut session) = self.sessions.remove(key) else {
            return;
        };
        session.stop_idle_timer(timers);
        session.invoke_cleanup();
        let _ = reactor.deregister(session.stream_mut());
        self.config.allowed_sessions += 1;
    }

    fn drop_session_without_cleanup(
        &mut self,
        key: SessionKey,
        reactor: &mut dyn Reactor,
        timers: &mut dyn TimerWheel,
    ) {
        let Some(mut session) = self.sessions.remove(key) else {
            return;
        };
        session.stop_idle_timer(timers);
        let _ = reactor.deregister(session.stream_mut());
        self.config.allowed_sessions += 1;
    }
}
