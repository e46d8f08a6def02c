// Copyright 2026 the Phitap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine signals over a `crossbeam-channel`.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use phitap_core::engine::{EngineSignal, SignalSource};

/// Creates a connected signal sender and engine-side source.
#[must_use]
pub fn channel() -> (Sender<EngineSignal>, ChannelSignals) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (tx, ChannelSignals { rx })
}

/// A [`SignalSource`] fed by any number of [`Sender`]s on other threads.
#[derive(Debug)]
pub struct ChannelSignals {
    rx: Receiver<EngineSignal>,
}

impl SignalSource for ChannelSignals {
    fn poll_signal(&mut self) -> Option<EngineSignal> {
        match self.rx.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use phitap_core::link::Generation;

    #[test]
    fn signals_arrive_in_send_order() {
        let down = EngineSignal::LinkDown {
            generation: Generation(2),
        };
        let (tx, mut signals) = channel();
        let worker = thread::spawn(move || {
            tx.send(down).unwrap();
            tx.send(EngineSignal::Cancel).unwrap();
        });
        worker.join().unwrap();
        assert_eq!(signals.poll_signal(), Some(down));
        assert_eq!(signals.poll_signal(), Some(EngineSignal::Cancel));
        // All senders are gone; the source just reports nothing.
        assert_eq!(signals.poll_signal(), None);
    }
}
