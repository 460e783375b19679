// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::{HashSet, VecDeque};

use mqtt_codec::PacketId;
use tokio::sync::oneshot;

/// Allocates and releases packet identifiers within `1..=max`.
/// `max` is `u16::MAX` for a plain client/server connection; a broker
/// multiplexing several downstream connections onto one upstream id space
/// may widen it, which is why the counter itself is `u32` rather than
/// hardcoding `u16`.
#[derive(Debug)]
pub struct PidManager {
    max: u32,
    in_use: HashSet<u32>,
    waiters: VecDeque<oneshot::Sender<PacketId>>,
}

impl Default for PidManager {
    fn default() -> Self {
        Self::new(u32::from(u16::MAX))
    }
}

impl PidManager {
    #[must_use]
    pub fn new(max: u32) -> Self {
        Self {
            max,
            in_use: HashSet::new(),
            waiters: VecDeque::new(),
        }
    }

    /// Lowest free id, or `None` if every id in `1..=max` is in use.
    #[must_use]
    pub fn acquire(&mut self) -> Option<PacketId> {
        if self.in_use.len() as u32 >= self.max {
            return None;
        }
        for candidate in 1..=self.max {
            if self.in_use.insert(candidate) {
                return Some(candidate as PacketId);
            }
        }
        None
    }

    /// Registers an application-supplied id (e.g. restored from a store).
    /// Fails if `id == 0` or the id is already in use.
    pub fn register(&mut self, id: PacketId) -> bool {
        id != 0 && self.in_use.insert(u32::from(id))
    }

    /// Releases `id`, waking the oldest queued waiter (if any) with it.
    pub fn release(&mut self, id: PacketId) {
        self.in_use.remove(&u32::from(id));
        if let Some(waiter) = self.waiters.pop_front() {
            self.in_use.insert(u32::from(id));
            let _ = waiter.send(id);
        }
    }

    /// Either an id immediately, or a receiver that resolves once one is
    /// released. Split from [`Self::acquire_wait`] so a caller sharing this
    /// manager behind a lock can drop the guard before suspending --
    /// `acquire_wait` itself is for a connection that owns its manager
    /// outright (its strand), where holding `&mut self` across the await is
    /// exactly "this strand is now waiting".
    pub fn poll_acquire_or_wait(&mut self) -> Result<PacketId, oneshot::Receiver<PacketId>> {
        if let Some(id) = self.acquire() {
            return Ok(id);
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        Err(rx)
    }

    /// Suspends until an id becomes available, honouring FIFO enqueue order
    /// among concurrent waiters.
    pub async fn acquire_wait(&mut self) -> PacketId {
        match self.poll_acquire_or_wait() {
            Ok(id) => id,
            Err(rx) => rx.await.expect("pid manager dropped while a waiter was queued"),
        }
    }

    #[must_use]
    pub fn is_in_use(&self, id: PacketId) -> bool {
        self.in_use.contains(&u32::from(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_and_reacquires() {
        let mut mgr = PidManager::default();
        let a = mgr.acquire().unwrap();
        let b = mgr.acquire().unwrap();
        assert_ne!(a, b);
        mgr.release(a);
        let c = mgr.acquire().unwrap();
        assert_eq!(a, c);
        let _ = b;
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut mgr = PidManager::new(2);
        assert!(mgr.acquire().is_some());
        assert!(mgr.acquire().is_some());
        assert!(mgr.acquire().is_none());
    }

    #[test]
    fn register_rejects_zero_and_duplicates() {
        let mut mgr = PidManager::default();
        assert!(!mgr.register(0));
        assert!(mgr.register(42));
        assert!(!mgr.register(42));
    }

    async fn acquire_wait_via(mgr: &std::sync::Arc<tokio::sync::Mutex<PidManager>>) -> PacketId {
        let rx = match mgr.lock().await.poll_acquire_or_wait() {
            Ok(id) => return id,
            Err(rx) => rx,
        };
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn waiters_wake_in_fifo_order() {
        let mut mgr = PidManager::new(1);
        let first = mgr.acquire().unwrap();

        let mgr = std::sync::Arc::new(tokio::sync::Mutex::new(mgr));
        let mgr_a = mgr.clone();
        let waiter_a = tokio::spawn(async move { acquire_wait_via(&mgr_a).await });
        tokio::task::yield_now().await;
        let mgr_b = mgr.clone();
        let waiter_b = tokio::spawn(async move { acquire_wait_via(&mgr_b).await });
        tokio::task::yield_now().await;

        mgr.lock().await.release(first);
        let got_a = waiter_a.await.unwrap();
        assert_eq!(got_a, first);

        mgr.lock().await.release(got_a);
        let got_b = waiter_b.await.unwrap();
        assert_eq!(got_b, first);
    }
}
