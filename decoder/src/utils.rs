// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use base::AsRawDescriptor;
use base::Event;
use base::EventWaitResult;
use base::RawDescriptor;
use sync::Mutex;

/// A pollable FIFO: the `Event` counter mirrors the number of pending entries, so the queue is
/// readable from a `WaitContext` exactly while it holds something.
pub struct EventQueue<T> {
    event: Event,
    pending_events: VecDeque<T>,
}

impl<T> EventQueue<T> {
    pub fn new() -> base::Result<Self> {
        Ok(Self {
            event: Event::new()?,
            pending_events: Default::default(),
        })
    }

    /// Add `event` to the queue.
    pub fn queue_event(&mut self, event: T) -> base::Result<()> {
        self.pending_events.push_back(event);
        self.event.write_count(1)?;
        Ok(())
    }

    /// Pops the oldest entry, or returns `None` without blocking if the queue is empty.
    pub fn dequeue_event(&mut self) -> base::Result<Option<T>> {
        let cpt = match self.event.wait_timeout(Duration::ZERO)? {
            EventWaitResult::Signaled(cpt) => cpt,
            EventWaitResult::TimedOut => return Ok(None),
        };
        let event = self.pending_events.pop_front();
        // Put the remainder back so the descriptor keeps signalling.
        if cpt > 1 {
            self.event.write_count(cpt - 1)?;
        }
        Ok(event)
    }

    /// Drops every pending entry for which `predicate` returns `false`.
    pub fn retain<P: FnMut(&T) -> bool>(&mut self, predicate: P) -> base::Result<()> {
        if !self.pending_events.is_empty() {
            self.event.wait_timeout(Duration::ZERO)?;
        }

        self.pending_events.retain(predicate);

        let num_pending_events = self.pending_events.len();
        if num_pending_events > 0 {
            self.event.write_count(num_pending_events as u64)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_events.is_empty()
    }
}

impl<T> AsRawDescriptor for EventQueue<T> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.event.as_raw_descriptor()
    }
}

/// An `EventQueue` shareable between the thread that produces entries and the one polling it.
pub struct SyncEventQueue<T>(Arc<Mutex<EventQueue<T>>>);

impl<T> Clone for SyncEventQueue<T> {
    fn clone(&self) -> Self {
        SyncEventQueue(Arc::clone(&self.0))
    }
}

impl<T> From<EventQueue<T>> for SyncEventQueue<T> {
    fn from(queue: EventQueue<T>) -> Self {
        Self(Arc::new(Mutex::new(queue)))
    }
}

impl<T> SyncEventQueue<T> {
    pub fn new() -> base::Result<Self> {
        EventQueue::new().map(Self::from)
    }

    pub fn queue_event(&self, event: T) -> base::Result<()> {
        self.0.lock().queue_event(event)
    }

    pub fn dequeue_event(&self) -> base::Result<Option<T>> {
        self.0.lock().dequeue_event()
    }

    pub fn retain<P: FnMut(&T) -> bool>(&self, predicate: P) -> base::Result<()> {
        self.0.lock().retain(predicate)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl<T> AsRawDescriptor for SyncEventQueue<T> {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.0.lock().as_raw_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use base::EventToken;
    use base::WaitContext;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum TestEvent {
        Picture(u32),
        Flushed,
    }

    fn is_readable<T: EventToken>(ctx: &WaitContext<T>) -> bool {
        !ctx.wait_timeout(Duration::ZERO).unwrap().is_empty()
    }

    #[test]
    fn readable_while_non_empty() {
        let mut queue = EventQueue::new().unwrap();
        let ctx: WaitContext<u32> = WaitContext::build_with(&[(&queue, 0)]).unwrap();
        assert!(!is_readable(&ctx));

        queue.queue_event(TestEvent::Picture(1)).unwrap();
        queue.queue_event(TestEvent::Flushed).unwrap();
        assert!(is_readable(&ctx));

        assert_eq!(
            queue.dequeue_event().unwrap(),
            Some(TestEvent::Picture(1))
        );
        assert!(is_readable(&ctx));
        assert_eq!(queue.dequeue_event().unwrap(), Some(TestEvent::Flushed));
        assert!(!is_readable(&ctx));
        assert_eq!(queue.dequeue_event().unwrap(), None);
    }

    #[test]
    fn retain_keeps_count_in_sync() {
        let queue = SyncEventQueue::new().unwrap();
        for i in 0..4 {
            queue.queue_event(TestEvent::Picture(i)).unwrap();
        }
        queue
            .retain(|e| matches!(e, TestEvent::Picture(i) if i % 2 == 0))
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.dequeue_event().unwrap(),
            Some(TestEvent::Picture(0))
        );
        assert_eq!(
            queue.dequeue_event().unwrap(),
            Some(TestEvent::Picture(2))
        );
        assert_eq!(queue.dequeue_event().unwrap(), None);

        queue.queue_event(TestEvent::Flushed).unwrap();
        queue.retain(|_| false).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue_event().unwrap(), None);
    }
}
