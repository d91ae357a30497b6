//! In-process message pipe for one leg of a call.

use tokio::sync::mpsc;

/// Default buffer for a leg's outbound and inbound channels.
///
/// Sized for a few seconds of 20 ms audio frames; a peer that falls
/// further behind than this applies backpressure to the pump.
pub const LINK_CAPACITY: usize = 256;

/// One side of a text-frame connection.
///
/// `tx` carries frames towards the peer and `rx` yields frames the peer sent.
/// Dropping `tx` is how a session closes the leg: the socket bridge behind
/// it sends a close frame and exits. `rx` returning `None` means the peer
/// went away.
#[derive(Debug)]
pub struct Link {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

impl Link {
    pub fn new(tx: mpsc::Sender<String>, rx: mpsc::Receiver<String>) -> Self {
        Self { tx, rx }
    }

    /// Creates two links wired to each other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    pub fn split(self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        (self.tx, self.rx)
    }
}
