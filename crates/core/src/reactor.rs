//! Reactor abstraction over the non-blocking I/O multiplexer.
//!
//! The engine only ever needs register/reregister/deregister/poll — this
//! mirrors the single-threaded `popol`/mio dispatch loops used elsewhere in
//! the ecosystem, where the reactor hands back a batch of readiness events
//! for the caller to interpret rather than invoking per-fd callbacks itself.

use std::io;
use std::time::Duration;

use mio::{Events, Interest, Token};

/// What the engine requires of an I/O event source.
pub trait Reactor {
    fn register(
        &mut self,
        source: &mut impl mio::event::Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;

    fn reregister(
        &mut self,
        source: &mut impl mio::event::Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;

    fn deregister(&mut self, source: &mut impl mio::event::Source) -> io::Result<()>;

    /// Blocks until at least one event is ready or `timeout` elapses,
    /// appending readiness to `events`. `timeout: None` blocks indefinitely.
    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;
}

/// Default [`Reactor`] backed by `mio::Poll`.
pub struct MioReactor {
    poll: mio::Poll,
}

impl MioReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
        })
    }
}

impl Reactor for MioReactor {
    fn register(
        &mut self,
        source: &mut impl mio::event::Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    fn reregister(
        &mut self,
        source: &mut impl mio::event::Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    fn deregister(&mut self, source: &mut impl mio::event::Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }
}

/// Tracks the currently-registered interest for one session's fd so
/// `enable`/`disable` only call `reregister` when the interest actually
/// changes, matching mio's "reregister replaces the whole interest set"
/// contract rather than a standalone flag flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestState {
    current: Interest,
}

impl InterestState {
    pub fn new(initial: Interest) -> Self {
        Self { current: initial }
    }

    pub fn get(&self) -> Interest {
        self.current
    }

    /// Enables `WRITABLE` if not already set, reregistering the source.
    pub fn enable_writable(
        &mut self,
        reactor: &mut impl Reactor,
        source: &mut impl mio::event::Source,
        token: Token,
    ) -> io::Result<()> {
        if !self.current.is_writable() {
            let next = self.current.add(Interest::WRITABLE);
            reactor.reregister(source, token, next)?;
            self.current = next;
        }
        Ok(())
    }

    /// Disables `WRITABLE`, reregistering the source, unless `READABLE` was
    /// the only other interest bit, in which case no bit remains to drop.
    pub fn disable_writable(
        &mut self,
        reactor: &mut impl Reactor,
        source: &mut impl mio::event::Source,
        token: Token,
    ) -> io::Result<()> {
        if self.current.is_writable() {
            if let Some(next) = remove_writable(self.current) {
                reactor.reregister(source, token, next)?;
                self.current = next;
            }
        }
        Ok(())
    }
}

fn remove_writable(interest: Interest) -> Option<Interest> {
    if interest.is_readable() {
        Some(Interest::READABLE)
    } else {
        None
    }
}
