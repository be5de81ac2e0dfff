// SPDX-License-Identifier: Apache-2.0

//! Bridge from the Health Monitor's recovery notifiers to the control
//! protocol.
//!
//! The notifier state machines run on the daemon tick and must never
//! block; the forwarder thread here performs the blocking set-state
//! request on their behalf and resolves the ticket the notifier polls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hale_core::limits::RECOVERY_RING_CAPACITY;
use hale_core::IdentifierHash;
use hale_health::{RecoveryHandler, RecoveryTicket, TicketOutcome};
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::control::{ControlClient, SetStateResult};

struct Queue {
    items: Mutex<VecDeque<(IdentifierHash, IdentifierHash, RecoveryTicket)>>,
    ready: Condvar,
}

pub struct RecoveryClient {
    queue: Arc<Queue>,
}

impl RecoveryClient {
    /// Start the forwarder thread issuing the requests through `control`.
    pub fn start(control: Arc<ControlClient>) -> std::io::Result<(Self, JoinHandle<()>)> {
        let queue =
            Arc::new(Queue { items: Mutex::new(VecDeque::new()), ready: Condvar::new() });
        let worker_queue = Arc::clone(&queue);

        let handle = std::thread::Builder::new().name("hale-recovery".to_string()).spawn(
            move || loop {
                let entry = {
                    let mut items = worker_queue.items.lock();
                    while items.is_empty() {
                        worker_queue.ready.wait_for(&mut items, Duration::from_millis(200));
                    }
                    items.pop_front()
                };
                let Some((group, state, ticket)) = entry else { continue };
                info!(group = %group, state = %state, "forwarding recovery request");
                match control.set_state(group, state) {
                    Ok(SetStateResult::Success | SetStateResult::AlreadyInState) => {
                        ticket.resolve(TicketOutcome::Success)
                    }
                    Ok(outcome) => {
                        warn!(?outcome, "recovery request was not carried out");
                        ticket.resolve(TicketOutcome::Error)
                    }
                    Err(err) => {
                        warn!(%err, "recovery request failed");
                        ticket.resolve(TicketOutcome::Error)
                    }
                }
            },
        )?;

        Ok((Self { queue }, handle))
    }
}

impl RecoveryHandler for RecoveryClient {
    fn send_request(
        &mut self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Option<RecoveryTicket> {
        let mut items = self.queue.items.lock();
        if items.len() >= RECOVERY_RING_CAPACITY {
            // The notifier converts a missing ticket into its timeout.
            return None;
        }
        let ticket = RecoveryTicket::new();
        items.push_back((group, state, ticket.clone()));
        drop(items);
        self.queue.ready.notify_one();
        Some(ticket)
    }
}
