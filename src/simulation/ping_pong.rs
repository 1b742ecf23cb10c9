/// Which physical slot of a [`PingPong`] pair is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Ping,
    Pong,
}

impl Slot {
    #[inline]
    fn other(self) -> Self {
        match self {
            Slot::Ping => Slot::Pong,
            Slot::Pong => Slot::Ping,
        }
    }
}

/// A double-buffered simulation channel.
///
/// Exactly one slot is readable as "current" at any time. Writes go to the
/// other slot, and `commit` flips the roles once the write is complete.
/// Generic over the buffer so the same state machine serves GPU image
/// handles and CPU texel vectors.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    ping: T,
    pong: T,
    current: Slot,
}

impl<T> PingPong<T> {
    pub fn new(ping: T, pong: T) -> Self {
        Self {
            ping,
            pong,
            current: Slot::Ping,
        }
    }

    /// Buffer holding the committed state
    pub fn read(&self) -> &T {
        self.get(self.current)
    }

    /// Buffer the next state is written into
    pub fn next(&self) -> &T {
        self.get(self.current.other())
    }

    /// Both buffers at once: `(current, next)`
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        match self.current {
            Slot::Ping => (&self.ping, &mut self.pong),
            Slot::Pong => (&self.pong, &mut self.ping),
        }
    }

    /// Publish the next buffer as current
    pub fn commit(&mut self) {
        self.current = self.current.other();
    }

    fn get(&self, slot: Slot) -> &T {
        match slot {
            Slot::Ping => &self.ping,
            Slot::Pong => &self.pong,
        }
    }
}

/// Read/write pair captured for one kernel dispatch, taken before the
/// channel is committed
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame<T> {
    pub source: T,
    pub target: T,
}

impl<T: Clone> PingPong<T> {
    pub fn frame(&self) -> ChannelFrame<T> {
        ChannelFrame {
            source: self.read().clone(),
            target: self.next().clone(),
        }
    }
}
