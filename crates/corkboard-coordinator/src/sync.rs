//! The periodic update sync loop.
//!
//! Fan-out can leave replicas behind: a quorum write lands on `Nw`
//! replicas only, and a failed leg leaves a survivor divergent. The sync
//! loop heals both. Each tick, if any ID above the `last_sent` watermark
//! has been assigned, it pulls `SEND_UPDATES` from a few sources, unions
//! the results by ID, broadcasts the combined batch to every replica, and
//! advances the watermark once everyone acked.
//!
//! Under quorum the sources are a random write-quorum's worth of
//! replicas; under RYW a single pull from the freshest known replica
//! suffices, since every completed write reached every replica already —
//! the loop only mops up after failed fan-out legs, which is what lets a
//! `CHECK` poller stuck on `WAIT` eventually converge.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use corkboard_types::{ConsistencyPolicy, MessageId, Version};
use corkboard_wire::Frame;

use crate::fanout::push_updates;
use crate::registry::{ReplicaEntry, effective_quorum};
use crate::Ctx;

pub(crate) struct SyncTask {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SyncTask {
    pub(crate) fn spawn(ctx: Arc<Ctx>, interval: Duration) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("coordinator-sync".to_string())
            .spawn(move || run(&ctx, interval, &stop_flag))
            .ok();
        if handle.is_none() {
            warn!("failed to spawn the sync thread");
        }
        Self {
            stop,
            handle,
        }
    }

    pub(crate) fn stop(mut self) {
        let (lock, condvar) = &*self.stop;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(ctx: &Ctx, interval: Duration, stop: &(Mutex<bool>, Condvar)) {
    let (lock, condvar) = stop;
    loop {
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = condvar
            .wait_timeout(guard, interval)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard {
            break;
        }
        drop(guard);
        tick(ctx);
    }
}

/// One sync round: pull, union, broadcast, advance the watermark.
pub(crate) fn tick(ctx: &Ctx) {
    let (start, goal, sources, targets) = {
        let state = ctx.shared.lock();
        if state.last_sent >= state.next_message_id {
            return;
        }
        let start = state.last_sent + 1;
        let goal = state.next_message_id;
        let sources: Vec<ReplicaEntry> = match ctx.policy {
            ConsistencyPolicy::Quorum => {
                let k = effective_quorum(state.registry.len(), ctx.write_quorum);
                state.registry.pick_random(k)
            }
            ConsistencyPolicy::ReadYourWrites => {
                state.registry.freshest().cloned().into_iter().collect()
            }
            ConsistencyPolicy::Sequential => return,
        };
        (start, goal, sources, state.registry.snapshot())
    };
    if sources.is_empty() || targets.is_empty() {
        return;
    }

    let request = match (Frame::SendUpdates {
        start: MessageId::new(start),
    })
    .encode()
    {
        Ok(line) => line,
        Err(e) => {
            warn!("unencodable sync request: {e}");
            return;
        }
    };

    // Union of updates across the sources, keyed (and ordered) by ID.
    let mut union: BTreeMap<u64, String> = BTreeMap::new();
    let mut any_pull_ok = false;
    for source in &sources {
        match ctx.transport.exchange_batch(source.addr(), &request) {
            Ok(lines) => {
                any_pull_ok = true;
                for line in lines {
                    match Frame::parse(&line).map(Frame::into_message) {
                        Ok(Some(msg)) => {
                            union.insert(u64::from(msg.id), line);
                        }
                        _ => warn!(source = %source.id, "ignoring bad sync line: {line:?}"),
                    }
                }
            }
            Err(e) => warn!(source = %source.id, "sync pull failed: {e}"),
        }
    }
    if !any_pull_ok {
        return;
    }

    let top = union.keys().next_back().copied().map_or(
        // Failed writes can leave assigned IDs with no surviving update;
        // nothing to broadcast, but the watermark still moves.
        MessageId::new(goal),
        MessageId::new,
    );
    let batch: Vec<String> = union.into_values().collect();

    let mut all_acked = true;
    if !batch.is_empty() {
        let results = push_updates(&ctx.transport, &batch, &targets, None);
        let mut state = ctx.shared.lock();
        for (replica, acked) in &results {
            if *acked {
                state.registry.record_version(*replica, Version::new(u64::from(top)));
            } else {
                all_acked = false;
            }
        }
    }

    if all_acked {
        let mut state = ctx.shared.lock();
        state.last_sent = state.last_sent.max(goal);
        info!(watermark = state.last_sent, sent = batch.len(), "sync round complete");
    } else {
        // Keep the watermark; the next tick resends (applies are idempotent).
        debug!(goal, sent = batch.len(), "sync round incomplete, will retry");
    }
}
