use std::time::Instant;

use crossbeam_channel::Receiver;

/// Source of display refresh ticks that pace the capture loop.
///
/// Each received `Instant` is one refresh; the loop does its work for that
/// tick and then waits for the next one, so it never runs ahead of the
/// display.
pub trait DisplayRefresh: Send {
    fn subscribe(&mut self) -> Receiver<Instant>;
}
