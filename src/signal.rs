//! Observer registry used for graph notifications.
//!
//! A [`Signal`] calls its connected slots in order. Connecting returns a
//! [`Connection`] that can block or disconnect the slot later.
//! [`ScopedConnection`] disconnects when dropped and [`BlockedConnection`]
//! blocks a slot for the duration of a scope.
//!
//! Slots are called without any internal lock held, so a slot may connect
//! or disconnect slots (including itself) while the signal is being emitted.
//! Changes take effect from the next emission, except that a slot
//! disconnected or blocked during an emission is not called later in that
//! same emission.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
struct SlotFlags {
    connected: AtomicBool,
    blocked: AtomicBool,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks invoked in connection order.
pub struct Signal<T: ?Sized> {
    slots: Mutex<Vec<(Arc<SlotFlags>, Callback<T>)>>,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("num_slots", &self.num_slots())
            .finish()
    }
}

impl<T: ?Sized> Signal<T> {
    /// Create a signal with no slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot called after all previously connected slots.
    pub fn connect(&self, slot: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        self.connect_internal(Arc::new(slot), false)
    }

    /// Add a slot called before all previously connected slots.
    pub fn connect_front(&self, slot: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        self.connect_internal(Arc::new(slot), true)
    }

    fn connect_internal(&self, callback: Callback<T>, front: bool) -> Connection {
        let flags = Arc::new(SlotFlags {
            connected: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
        });
        let mut slots = self.slots.lock();
        slots.retain(|(flags, _)| flags.connected.load(Ordering::Acquire));
        if front {
            slots.insert(0, (flags.clone(), callback));
        } else {
            slots.push((flags.clone(), callback));
        }
        Connection { flags: Some(flags) }
    }

    /// Disconnect every slot, including slots connected by others.
    pub fn disconnect_all(&self) {
        let mut slots = self.slots.lock();
        for (flags, _) in slots.drain(..) {
            flags.connected.store(false, Ordering::Release);
        }
    }

    /// Number of connected slots.
    pub fn num_slots(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|(flags, _)| flags.connected.load(Ordering::Acquire))
            .count()
    }

    /// Returns true if no slot is connected.
    pub fn is_empty(&self) -> bool {
        self.num_slots() == 0
    }

    /// Call every connected, unblocked slot in order.
    pub fn emit(&self, args: &T) {
        let snapshot: Vec<_> = {
            let mut slots = self.slots.lock();
            slots.retain(|(flags, _)| flags.connected.load(Ordering::Acquire));
            slots.clone()
        };
        for (flags, callback) in snapshot {
            if flags.connected.load(Ordering::Acquire) && !flags.blocked.load(Ordering::Acquire) {
                callback(args);
            }
        }
    }
}

/// Handle to a connected slot.
///
/// Dropping a `Connection` leaves the slot connected; use
/// [`ScopedConnection`] for automatic disconnection.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    flags: Option<Arc<SlotFlags>>,
}

impl Connection {
    /// Remove the slot from its signal. The callback is released on the
    /// signal's next connect or emit.
    pub fn disconnect(&self) {
        if let Some(flags) = &self.flags {
            flags.connected.store(false, Ordering::Release);
        }
    }

    /// Returns true if the slot has not been disconnected.
    pub fn connected(&self) -> bool {
        self.flags
            .as_ref()
            .is_some_and(|flags| flags.connected.load(Ordering::Acquire))
    }

    /// Block or unblock the slot. Blocked slots are skipped on emission.
    pub fn set_blocked(&self, blocked: bool) {
        if let Some(flags) = &self.flags {
            flags.blocked.store(blocked, Ordering::Release);
        }
    }

    /// Returns true if the slot is blocked.
    pub fn blocked(&self) -> bool {
        self.flags
            .as_ref()
            .is_some_and(|flags| flags.blocked.load(Ordering::Acquire))
    }
}

/// A connection that disconnects its slot when dropped.
#[derive(Debug, Default)]
pub struct ScopedConnection {
    connection: Connection,
}

impl ScopedConnection {
    /// Take ownership of a connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Disconnect the current slot and hold `connection` instead.
    pub fn replace(&mut self, connection: Connection) {
        self.connection.disconnect();
        self.connection = connection;
    }

    /// The held connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl From<Connection> for ScopedConnection {
    fn from(connection: Connection) -> Self {
        Self::new(connection)
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

/// Blocks a connection until dropped, then restores its previous state.
#[derive(Debug)]
pub struct BlockedConnection<'a> {
    connection: &'a Connection,
    previously_blocked: bool,
}

impl<'a> BlockedConnection<'a> {
    /// Block `connection` for the lifetime of the returned guard.
    pub fn new(connection: &'a Connection) -> Self {
        let previously_blocked = connection.blocked();
        connection.set_blocked(true);
        Self {
            connection,
            previously_blocked,
        }
    }
}

impl Drop for BlockedConnection<'_> {
    fn drop(&mut self) {
        self.connection.set_blocked(self.previously_blocked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Signal<str>) {
        (Arc::new(Mutex::new(Vec::new())), Signal::new())
    }

    #[test]
    fn test_emission_order() {
        let (log, signal) = recorder();
        let l = log.clone();
        let _a = signal.connect(move |s| l.lock().push(format!("a:{s}")));
        let l = log.clone();
        let _b = signal.connect(move |s| l.lock().push(format!("b:{s}")));
        let l = log.clone();
        let _c = signal.connect_front(move |s| l.lock().push(format!("c:{s}")));

        signal.emit("x");
        assert_eq!(*log.lock(), vec!["c:x", "a:x", "b:x"]);
        assert_eq!(signal.num_slots(), 3);
    }

    #[test]
    fn test_disconnect_and_block() {
        let (log, signal) = recorder();
        let l = log.clone();
        let connection = signal.connect(move |s| l.lock().push(s.to_string()));

        {
            let _blocked = BlockedConnection::new(&connection);
            assert!(connection.blocked());
            signal.emit("blocked");
        }
        assert!(!connection.blocked());
        signal.emit("unblocked");

        connection.disconnect();
        assert!(!connection.connected());
        signal.emit("disconnected");

        assert_eq!(*log.lock(), vec!["unblocked"]);
        assert!(signal.is_empty());
    }

    #[test]
    fn test_scoped_connection() {
        let (log, signal) = recorder();
        {
            let l = log.clone();
            let _scoped = ScopedConnection::new(signal.connect(move |s| l.lock().push(s.into())));
            signal.emit("in scope");
        }
        signal.emit("out of scope");
        assert_eq!(*log.lock(), vec!["in scope"]);
    }

    #[test]
    fn test_slot_may_disconnect_itself() {
        let signal: Arc<Signal<str>> = Arc::new(Signal::new());
        let count = Arc::new(Mutex::new(0));
        let holder: Arc<Mutex<Connection>> = Arc::new(Mutex::new(Connection::default()));
        let (c, h) = (count.clone(), holder.clone());
        *holder.lock() = signal.connect(move |_| {
            *c.lock() += 1;
            h.lock().disconnect();
        });
        signal.emit("first");
        signal.emit("second");
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_disconnect_all() {
        let (_log, signal) = recorder();
        let a = signal.connect(|_| {});
        let b = signal.connect(|_| {});
        signal.disconnect_all();
        assert!(!a.connected());
        assert!(!b.connected());
        assert_eq!(signal.num_slots(), 0);
    }
}
