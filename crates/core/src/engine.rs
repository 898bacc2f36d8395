//! Process-wide registry of listeners, and the single-threaded dispatch
//! loop that drives them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Token};
use slotmap::SlotMap;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::listener::{Listener, ListenerConfig};
use crate::reactor::{MioReactor, Reactor};
use crate::session::{ListenerKey, SessionHandler, SessionKey};
use crate::timer::{ClassId, TimerWheel, WheelTimer};

#[derive(Clone, Copy)]
enum TokenOwner {
    Listener(ListenerKey),
    Session(ListenerKey, SessionKey),
}

/// Owns every listener (and, transitively, every session) driven by one
/// reactor on one thread. Independent `Engine`s may run on separate
/// threads; a single `Engine`'s listeners and sessions must only ever be
/// touched from the thread that calls [`Engine::turn`].
pub struct Engine {
    reactor: Box<dyn Reactor>,
    timers: Box<dyn TimerWheel>,
    listeners: SlotMap<ListenerKey, Listener>,
    tokens: HashMap<Token, TokenOwner>,
    next_token: usize,
    idle_timer_class: ClassId,
    refcount: usize,
}

impl Engine {
    /// Builds a fresh, fully-initialized engine, or rolls back and returns
    /// an error if any step of construction fails — callers never observe
    /// a half-constructed `Engine`.
    pub fn init() -> Result<Self> {
        let reactor = MioReactor::new()?;
        let mut timers = WheelTimer::new();
        let idle_timer_class = timers.register_class(false);
        info!("engine initialized");
        Ok(Self {
            reactor: Box::new(reactor),
            timers: Box::new(timers),
            listeners: SlotMap::with_key(),
            tokens: HashMap::new(),
            next_token: 0,
            idle_timer_class,
            refcount: 1,
        })
    }

    /// Registers one more logical owner of this engine. Matched by a call
    /// to [`Engine::release`]; the engine only tears down once the
    /// refcount returns to zero.
    pub fn acquire(&mut self) {
        self.refcount += 1;
    }

    /// Releases one logical owner. Returns `true` once the refcount has
    /// reached zero and every listener (and its sessions) has been torn
    /// down — the caller should drop the engine after this returns `true`.
    pub fn release(&mut self) -> bool {
        if self.refcount == 0 {
            return true;
        }
        self.refcount -= 1;
        if self.refcount != 0 {
            return false;
        }
        let keys: Vec<ListenerKey> = self.listeners.keys().collect();
        for key in keys {
            let _ = self.remove_listener(key);
        }
        info!("engine cleaned up");
        true
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn add_listener(
        &mut self,
        addr: SocketAddr,
        config: ListenerConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<ListenerKey> {
        let token = self.alloc_token();
        let bound = Listener::bind(
            addr,
            config,
            handler,
            token,
            self.reactor.as_mut(),
            self.idle_timer_class,
        )?;
        let key = self.listeners.insert(bound);
        self.tokens.insert(token, TokenOwner::Listener(key));
        Ok(key)
    }

    pub fn remove_listener(&mut self, key: ListenerKey) -> Result<()> {
        let Some(mut listener) = self.listeners.remove(key) else {
            return Err(EngineError::ListenerNotFound);
        };
        self.tokens.remove(&listener.token());
        for session_key in listener.sessions_mut().keys().collect::<Vec<_>>() {
            if let Some(session) = listener.session(session_key) {
                self.tokens.remove(&session.token());
            }
        }
        listener
            .teardown(self.reactor.as_mut(), self.timers.as_mut())
            .map_err(EngineError::Io)?;
        Ok(())
    }

    pub fn connect_to(
        &mut self,
        listener_key: ListenerKey,
        remote_addr: SocketAddr,
    ) -> Result<Option<SessionKey>> {
        let token = self.alloc_token();
        let now = Instant::now();
        let listener = self
            .listeners
            .get_mut(listener_key)
            .ok_or(EngineError::ListenerNotFound)?;
        let result = listener.connect_to(
            listener_key,
            remote_addr,
            token,
            self.reactor.as_mut(),
            self.timers.as_mut(),
            now,
        )?;
        if let Some(session_key) = result {
            self.tokens
                .insert(token, TokenOwner::Session(listener_key, session_key));
        }
        Ok(result)
    }

    pub fn listener(&self, key: ListenerKey) -> Option<&Listener> {
        self.listeners.get(key)
    }

    pub fn listener_mut(&mut self, key: ListenerKey) -> Option<&mut Listener> {
        self.listeners.get_mut(key)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Runs one iteration of the event loop: blocks in the reactor for at
    /// most the time until the next timer deadline (or `max_wait`,
    /// whichever is sooner), dispatches any readiness, then drains expired
    /// timers.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> std::io::Result<()> {
        let before = Instant::now();
        let timeout = match (self.timers.next_deadline(), max_wait) {
            (Some(deadline), Some(cap)) => {
                Some(deadline.saturating_duration_since(before).min(cap))
            }
            (Some(deadline), None) => Some(deadline.saturating_duration_since(before)),
            (None, cap) => cap,
        };

        let mut events = Events::with_capacity(256);
        self.reactor.poll(&mut events, timeout)?;
        // Re-read the clock: `poll` may have blocked up to `timeout`, so
        // `before` is stale by the time dispatch and timer drain run —
        // using it here would delay an idle timeout's firing by one turn.
        let now = Instant::now();

        for event in events.iter() {
            let Some(owner) = self.tokens.get(&event.token()).copied() else {
                continue;
            };
            match owner {
                TokenOwner::Listener(listener_key) => {
                    self.dispatch_accept(listener_key, now);
                }
                TokenOwner::Session(listener_key, session_key) => {
                    self.dispatch_session(listener_key, session_key, event.is_readable(), event.is_writable(), now);
                }
            }
        }

        self.drain_expired_timers(now);
        Ok(())
    }

    fn dispatch_accept(&mut self, listener_key: ListenerKey, now: Instant) {
        let reactor = &mut self.reactor;
        let timers = &mut self.timers;
        let next_token_counter = &mut self.next_token;
        let tokens = &mut self.tokens;
        let Some(listener) = self.listeners.get_mut(listener_key) else {
            return;
        };
        let mut alloc = || {
            let t = Token(*next_token_counter);
            *next_token_counter += 1;
            t
        };
        let admitted = listener.accept(
            listener_key,
            &mut alloc,
            reactor.as_mut(),
            timers.as_mut(),
            now,
        );
        for session_key in admitted {
            if let Some(session) = listener.session(session_key) {
                tokens.insert(
                    session.token(),
                    TokenOwner::Session(listener_key, session_key),
                );
            }
        }
    }

    fn dispatch_session(
        &mut self,
        listener_key: ListenerKey,
        session_key: SessionKey,
        readable: bool,
        writable: bool,
        now: Instant,
    ) {
        let Some(listener) = self.listeners.get_mut(listener_key) else {
            return;
        };
        let Some(session) = listener.session_mut(session_key) else {
            return;
        };
        let token = session.token();
        let done = session.on_ready(readable, writable, self.reactor.as_mut(), self.timers.as_mut(), now);
        if done {
            self.tokens.remove(&token);
            listener.close_session(session_key, self.reactor.as_mut(), self.timers.as_mut());
        }
    }

    fn drain_expired_timers(&mut self, now: Instant) {
        let due = self.timers.expired(now);
        if due.is_empty() {
            return;
        }
        // Idle timeouts fire on a session's own timer id, which is not
        // separately indexed by session — so a due timer is resolved by
        // scanning live sessions. This is a deliberate tradeoff: a plain
        // HashMap<TimerId, (ListenerKey, SessionKey)> would be O(1) but
        // adds bookkeeping kept in two places; listener/session counts in
        // the targeted workloads are small enough that the scan is cheap.
        for timer_id in due {
            warn!(?timer_id, "session idle timeout");
            self.close_session_by_timer(timer_id);
        }
    }

    fn close_session_by_timer(&mut self, timer_id: crate::timer::TimerId) {
        let mut target: Option<(ListenerKey, SessionKey)> = None;
        'outer: for (listener_key, listener) in self.listeners.iter() {
            for (session_key, session) in listener.sessions_iter() {
                if session.idle_timer_id() == Some(timer_id) {
                    target = Some((listener_key, session_key));
                    break 'outer;
                }
            }
        }
        if let Some((listener_key, session_key)) = target {
            if let Some(listener) = self.listeners.get_mut(listener_key) {
                if let Some(session) = listener.session(session_key) {
                    self.tokens.remove(&session.token());
                }
                listener.close_session(session_key, self.reactor.as_mut(), self.timers.as_mut());
            }
        }
    }
}
