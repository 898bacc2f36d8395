//! Heap-based timeout manager backing per-session idle timers.
//!
//! Pairs with the reactor's own poll timeout rather than running on its own
//! thread: `Engine::turn` asks [`TimerWheel::next_deadline`] for how long it
//! may block in `Reactor::poll`, then drains [`TimerWheel::expired`] once it
//! wakes. No background thread, no callback re-entrancy.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

slotmap::new_key_type! {
    pub struct TimerId;
}

slotmap::new_key_type! {
    pub struct ClassId;
}

struct ClassEntry {
    periodic: bool,
}

struct Armed {
    deadline: Instant,
    class: ClassId,
    relative: Duration,
    cancelled: bool,
}

/// What the engine requires of a timeout manager: register timer classes,
/// arm/rearm/cancel individual timers, and learn which ones are due.
pub trait TimerWheel {
    fn register_class(&mut self, periodic: bool) -> ClassId;
    fn start(&mut self, class: ClassId, relative: Duration, now: Instant) -> TimerId;
    fn set(
        &mut self,
        timer: Option<TimerId>,
        relative: Duration,
        class: ClassId,
        now: Instant,
    ) -> TimerId;
    fn stop(&mut self, timer: TimerId);
    fn next_deadline(&self) -> Option<Instant>;
    fn expired(&mut self, now: Instant) -> Vec<TimerId>;
}

/// Default [`TimerWheel`]: a min-heap of deadlines keyed by a slotmap handle
/// so cancelled/rearmed entries don't require heap removal — they are
/// marked cancelled and skipped when popped.
#[derive(Default)]
pub struct WheelTimer {
    classes: slotmap::SlotMap<ClassId, ClassEntry>,
    timers: slotmap::SlotMap<TimerId, Armed>,
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
}

impl WheelTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&mut self, class: ClassId, relative: Duration, now: Instant) -> TimerId {
        let deadline = now + relative;
        let id = self.timers.insert(Armed {
            deadline,
            class,
            relative,
            cancelled: false,
        });
        self.heap.push(Reverse((deadline, id)));
        id
    }
}

impl TimerWheel for WheelTimer {
    fn register_class(&mut self, periodic: bool) -> ClassId {
        self.classes.insert(ClassEntry { periodic })
    }

    fn start(&mut self, class: ClassId, relative: Duration, now: Instant) -> TimerId {
        self.arm(class, relative, now)
    }

    fn set(
        &mut self,
        timer: Option<TimerId>,
        relative: Duration,
        class: ClassId,
        now: Instant,
    ) -> TimerId {
        if let Some(id) = timer {
            if let Some(armed) = self.timers.get_mut(id) {
                armed.cancelled = true;
            }
        }
        self.arm(class, relative, now)
    }

    fn stop(&mut self, timer: TimerId) {
        if let Some(armed) = self.timers.get_mut(timer) {
            armed.cancelled = true;
        }
        self.timers.remove(timer);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    fn expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due = Vec::new();
        while let Some(&Reverse((deadline, id))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            let Some(armed) = self.timers.get(id) else {
                continue;
            };
            if armed.cancelled {
                self.timers.remove(id);
                continue;
            }
            let periodic = self.classes.get(armed.class).is_some_and(|c| c.periodic);
            if periodic {
                let relative = armed.relative;
                let class = armed.class;
                due.push(id);
                self.arm(class, relative, now);
            } else {
                due.push(id);
                self.timers.remove(id);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_in_deadline_order() {
        let mut wheel = WheelTimer::new();
        let class = wheel.register_class(false);
        let now = Instant::now();
        let far = wheel.start(class, Duration::from_secs(10), now);
        let near = wheel.start(class, Duration::from_millis(1), now);

        let due = wheel.expired(now + Duration::from_millis(5));
        assert_eq!(due, vec![near]);
        assert!(wheel.next_deadline().unwrap() > now + Duration::from_secs(9));
        let _ = far;
    }

    #[test]
    fn stop_prevents_expiry() {
        let mut wheel = WheelTimer::new();
        let class = wheel.register_class(false);
        let now = Instant::now();
        let id = wheel.start(class, Duration::from_millis(1), now);
        wheel.stop(id);
        let due = wheel.expired(now + Duration::from_secs(1));
        assert!(due.is_empty());
    }

    #[test]
    fn set_rearms_and_cancels_previous() {
        let mut wheel = WheelTimer::new();
        let class = wheel.register_class(false);
        let now = Instant::now();
        let id = wheel.start(class, Duration::from_millis(1), now);
        let rearmed = wheel.set(Some(id), Duration::from_secs(10), class, now);
        assert_ne!(id, rearmed);
        let due = wheel.expired(now + Duration::from_millis(5));
        assert!(due.is_empty());
    }

    #[test]
    fn periodic_class_rearms_itself_on_expiry() {
        let mut wheel = WheelTimer::new();
        let class = wheel.register_class(true);
        let now = Instant::now();
        let id = wheel.start(class, Duration::from_millis(1), now);
        let due = wheel.expired(now + Duration::from_millis(5));
        assert_eq!(due, vec![id]);
        assert!(wheel.next_deadline().is_some());
    }
}
