use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared queue behind a [`PacketSender`] / [`PacketInbox`] pair.
type Queue<A> = Arc<Mutex<VecDeque<(A, Vec<u8>)>>>;

/// Creates a single-producer, single-consumer hand-off for inbound packets.
///
/// A background I/O thread pushes received datagrams through the
/// [`PacketSender`]; the simulation thread drains the [`PacketInbox`] once per
/// tick, usually through
/// [`LockstepSession::drain_inbox`](crate::LockstepSession::drain_inbox).
///
/// ```
/// use lockstep_sync::packet_channel;
///
/// let (sender, inbox) = packet_channel::<u32>();
/// let io = std::thread::spawn(move || {
///     sender.push(7, vec![1, 2, 3]);
/// });
/// io.join().expect("io thread");
/// assert_eq!(inbox.drain(), vec![(7, vec![1, 2, 3])]);
/// ```
#[must_use]
pub fn packet_channel<A>() -> (PacketSender<A>, PacketInbox<A>) {
    let queue: Queue<A> = Arc::new(Mutex::new(VecDeque::new()));
    (
        PacketSender {
            queue: Arc::clone(&queue),
        },
        PacketInbox { queue },
    )
}

/// Producer half of [`packet_channel`].
#[derive(Debug)]
pub struct PacketSender<A> {
    queue: Queue<A>,
}

impl<A> PacketSender<A> {
    /// Queues one packet received from `addr`.
    pub fn push(&self, addr: A, packet: Vec<u8>) {
        self.queue.lock().push_back((addr, packet));
    }

    /// Returns `true` once the inbox has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        Arc::strong_count(&self.queue) < 2
    }
}

/// Consumer half of [`packet_channel`].
#[derive(Debug)]
pub struct PacketInbox<A> {
    queue: Queue<A>,
}

impl<A> PacketInbox<A> {
    /// Takes every queued packet, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<(A, Vec<u8>)> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    /// Number of queued packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_empties() {
        let (sender, inbox) = packet_channel::<&'static str>();
        sender.push("a", vec![1]);
        sender.push("b", vec![2]);
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.drain(), vec![("a", vec![1]), ("b", vec![2])]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn sender_notices_dropped_inbox() {
        let (sender, inbox) = packet_channel::<u8>();
        assert!(!sender.is_closed());
        drop(inbox);
        assert!(sender.is_closed());
    }
}
