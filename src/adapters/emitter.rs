use tokio::sync::mpsc;

use crate::core::ports::emitter::{EmitterPort, SessionEvent};

/// Forwards session events to a tokio channel; a dropped receiver is ignored.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EmitterPort for ChannelEmitter {
    fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

pub struct NoopEmitter;

impl EmitterPort for NoopEmitter {
    fn emit(&self, _event: SessionEvent) {}
}
