// SPDX-License-Identifier: Apache-2.0

//! Owns every Health Monitor object of one software cluster and routes the
//! events between them.
//!
//! Subscriptions are index tables computed once from the configuration;
//! during operation the handler only pushes values along them, in the tick
//! order monitors -> alive -> deadline -> logical -> local -> global ->
//! recovery.

use std::collections::HashMap;

use hale_core::config::{HmConfig, MonitorInterfaceConfig};
use hale_core::{GlobalStatus, IdentifierHash, MonotonicClock, Nanos, SupervisionKind};

use crate::event::{
    CheckpointIdx, CheckpointSnapshot, ElemRef, LocalStatusUpdate, ProcessIdx, ProcessSnapshot,
    StatusUpdate,
};
use crate::monitor::{CheckpointDrain, MonitorEvent, MonitorInterface};
use crate::process::ProcessMirror;
use crate::reader::{ProcessStateReader, ProcessStateSource};
use crate::recovery::{RecoveryHandler, RecoveryNotifier};
use crate::supervision::{
    AliveSupervision, DeadlineSupervision, GlobalSupervision, LocalSupervision, LogicalSupervision,
};
use crate::HealthError;

/// Health summary of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Any recovery notification is at its final timeout: the watchdog
    /// reaction must fire instead of servicing.
    pub recovery_timeout: bool,
    /// Any global supervision currently reports `Stopped`.
    pub any_stopped: bool,
}

pub struct ClusterHandler<S> {
    mirrors: Vec<ProcessMirror>,
    index_of: HashMap<IdentifierHash, ProcessIdx>,
    platform: Vec<ProcessIdx>,

    monitors: Vec<MonitorInterface<S>>,
    monitors_of_process: Vec<Vec<usize>>,
    checkpoints_of_monitor: Vec<Vec<CheckpointIdx>>,
    checkpoint_ids: Vec<u32>,
    checkpoint_watchers: Vec<Vec<ElemRef>>,
    process_watchers: Vec<Vec<ElemRef>>,
    global_watchers_of_process: Vec<Vec<usize>>,

    alives: Vec<AliveSupervision>,
    deadlines: Vec<DeadlineSupervision>,
    logicals: Vec<LogicalSupervision>,
    locals_of_elem: HashMap<ElemRef, Vec<usize>>,
    locals: Vec<LocalSupervision>,
    globals_of_local: Vec<Vec<usize>>,
    globals: Vec<GlobalSupervision>,
    notifiers: Vec<RecoveryNotifier>,
}

impl<S: CheckpointDrain> ClusterHandler<S> {
    /// Construct and wire everything from the configuration. `make_source`
    /// opens (or fakes) the checkpoint ring of each monitor interface.
    pub fn build<F>(hm: &HmConfig, mut make_source: F) -> Result<Self, HealthError>
    where
        F: FnMut(&MonitorInterfaceConfig) -> Result<S, HealthError>,
    {
        let process_count = hm.processes.len();
        let checkpoint_count = hm.checkpoints.len();

        let mirrors: Vec<ProcessMirror> = hm.processes.iter().map(ProcessMirror::new).collect();
        let index_of = hm
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.process_id, i))
            .collect::<HashMap<_, _>>();
        let platform = hm
            .processes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_platform)
            .map(|(i, _)| i)
            .collect();

        let mut monitors = Vec::with_capacity(hm.monitors.len());
        let mut monitors_of_process = vec![Vec::new(); process_count];
        for (m, config) in hm.monitors.iter().enumerate() {
            let source = make_source(config)?;
            monitors.push(MonitorInterface::new(config.name.clone(), config.process, source));
            monitors_of_process[config.process].push(m);
        }

        let mut checkpoints_of_monitor = vec![Vec::new(); hm.monitors.len()];
        let mut checkpoint_ids = Vec::with_capacity(checkpoint_count);
        for (c, config) in hm.checkpoints.iter().enumerate() {
            checkpoints_of_monitor[config.monitor].push(c);
            checkpoint_ids.push(config.id);
        }
        let checkpoint_process: Vec<ProcessIdx> =
            hm.checkpoints.iter().map(|c| c.process).collect();

        let mut checkpoint_watchers: Vec<Vec<ElemRef>> = vec![Vec::new(); checkpoint_count];
        let mut process_watchers: Vec<Vec<ElemRef>> = vec![Vec::new(); process_count];

        let mut alives = Vec::with_capacity(hm.alives.len());
        for (i, config) in hm.alives.iter().enumerate() {
            alives.push(AliveSupervision::new(i, config));
            checkpoint_watchers[config.checkpoint].push((SupervisionKind::Alive, i));
            for &p in &config.processes {
                process_watchers[p].push((SupervisionKind::Alive, i));
            }
        }

        let mut deadlines = Vec::with_capacity(hm.deadlines.len());
        for (i, config) in hm.deadlines.iter().enumerate() {
            deadlines.push(DeadlineSupervision::new(
                i,
                config,
                checkpoint_process[config.source],
                checkpoint_process[config.target],
            ));
            checkpoint_watchers[config.source].push((SupervisionKind::Deadline, i));
            checkpoint_watchers[config.target].push((SupervisionKind::Deadline, i));
            for &p in &config.processes {
                process_watchers[p].push((SupervisionKind::Deadline, i));
            }
        }

        let mut logicals = Vec::with_capacity(hm.logicals.len());
        for (i, config) in hm.logicals.iter().enumerate() {
            logicals.push(LogicalSupervision::new(
                i,
                config,
                &checkpoint_ids,
                checkpoint_process.clone(),
            ));
            for node in &config.nodes {
                let watcher = (SupervisionKind::Logical, i);
                if !checkpoint_watchers[node.checkpoint].contains(&watcher) {
                    checkpoint_watchers[node.checkpoint].push(watcher);
                }
            }
            for &p in &config.processes {
                process_watchers[p].push((SupervisionKind::Logical, i));
            }
        }

        let mut locals_of_elem: HashMap<ElemRef, Vec<usize>> = HashMap::new();
        let locals: Vec<LocalSupervision> = hm
            .locals
            .iter()
            .enumerate()
            .map(|(i, config)| {
                for &elem in &config.elementaries {
                    locals_of_elem.entry(elem).or_default().push(i);
                }
                LocalSupervision::new(i, config)
            })
            .collect();

        let mut notifiers = hm
            .recoveries
            .iter()
            .map(RecoveryNotifier::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut globals_of_local = vec![Vec::new(); hm.locals.len()];
        let mut global_watchers_of_process: Vec<Vec<usize>> = vec![Vec::new(); process_count];
        let mut globals: Vec<GlobalSupervision> = Vec::with_capacity(hm.globals.len());
        for (g, config) in hm.globals.iter().enumerate() {
            for &l in &config.locals {
                globals_of_local[l].push(g);
                // A global watches the processes of the elementaries
                // aggregated under its locals.
                for &(kind, index) in &hm.locals[l].elementaries {
                    let processes = match kind {
                        SupervisionKind::Alive => &hm.alives[index].processes,
                        SupervisionKind::Deadline => &hm.deadlines[index].processes,
                        SupervisionKind::Logical => &hm.logicals[index].processes,
                    };
                    for &p in processes {
                        if !global_watchers_of_process[p].contains(&g) {
                            global_watchers_of_process[p].push(g);
                        }
                    }
                }
            }
            let mut config = config.clone();
            if config.recoveries.is_empty() {
                // No configured notification: a stop must still reach the
                // watchdog, through the dummy notifier.
                notifiers.push(RecoveryNotifier::dummy());
                config.recoveries.push(notifiers.len() - 1);
            }
            globals.push(GlobalSupervision::new(&config));
        }

        Ok(Self {
            mirrors,
            index_of,
            platform,
            monitors,
            monitors_of_process,
            checkpoints_of_monitor,
            checkpoint_ids,
            checkpoint_watchers,
            process_watchers,
            global_watchers_of_process,
            alives,
            deadlines,
            logicals,
            locals_of_elem,
            locals,
            globals_of_local,
            globals,
            notifiers,
        })
    }

    /// Pull process-state records off the ring and route them.
    pub fn drain_process_states<Src: ProcessStateSource>(
        &mut self,
        reader: &mut ProcessStateReader<Src>,
        sync_ts: Nanos,
    ) {
        let mut snapshots = Vec::new();
        reader.distribute(sync_ts, &mut self.mirrors, &self.index_of, &mut snapshots);
        for snapshot in snapshots {
            self.handle_process_event(snapshot);
        }
    }

    /// Synthesize the platform-process activation at daemon start.
    pub fn distribute_platform_activation<Src: ProcessStateSource>(
        &mut self,
        reader: &mut ProcessStateReader<Src>,
        timestamp: Nanos,
    ) {
        let mut snapshots = Vec::new();
        let platform = self.platform.clone();
        reader.distribute_platform_activation(
            timestamp,
            &mut self.mirrors,
            &platform,
            &mut snapshots,
        );
        for snapshot in snapshots {
            self.handle_process_event(snapshot);
        }
    }

    /// Route one process-state snapshot to monitors, elementary
    /// supervisions and globals.
    pub fn handle_process_event(&mut self, snapshot: ProcessSnapshot) {
        for &m in &self.monitors_of_process[snapshot.process] {
            self.monitors[m].on_process_state(&snapshot);
        }
        for &(kind, index) in &self.process_watchers[snapshot.process] {
            match kind {
                SupervisionKind::Alive => self.alives[index].on_process_state(snapshot),
                SupervisionKind::Deadline => self.deadlines[index].on_process_state(snapshot),
                SupervisionKind::Logical => self.logicals[index].on_process_state(snapshot),
            }
        }
        for &g in &self.global_watchers_of_process[snapshot.process] {
            self.globals[g].on_process_state(&snapshot);
        }
    }

    /// One daemon tick: drain the monitors, evaluate every supervision in
    /// dependency order, trigger the recovery notifiers.
    pub fn tick(
        &mut self,
        sync_ts: Nanos,
        clock: &dyn MonotonicClock,
        handler: &mut dyn RecoveryHandler,
    ) -> TickReport {
        self.drain_monitors(sync_ts);

        let mut status_updates: Vec<StatusUpdate> = Vec::new();
        for alive in &mut self.alives {
            alive.evaluate(sync_ts, &mut status_updates);
        }
        for deadline in &mut self.deadlines {
            deadline.evaluate(sync_ts, &mut status_updates);
        }
        for logical in &mut self.logicals {
            logical.evaluate(sync_ts, &mut status_updates);
        }
        for update in status_updates {
            if let Some(watchers) = self.locals_of_elem.get(&update.source) {
                for &l in watchers {
                    self.locals[l].on_elementary(update);
                }
            }
        }

        let mut local_updates: Vec<LocalStatusUpdate> = Vec::new();
        for local in &mut self.locals {
            local.evaluate(sync_ts, &mut local_updates);
        }
        for update in local_updates {
            for &g in &self.globals_of_local[update.local] {
                self.globals[g].on_local(update);
            }
        }

        for global in &mut self.globals {
            let mut infos = Vec::new();
            global.evaluate(sync_ts, &mut infos);
            for info in infos {
                for &r in global.recoveries() {
                    self.notifiers[r].send(&info);
                }
            }
        }

        for notifier in &mut self.notifiers {
            notifier.cyclic_trigger(clock, handler);
        }

        TickReport {
            recovery_timeout: self.notifiers.iter().any(|n| n.is_final_timeout_reached()),
            any_stopped: self.globals.iter().any(|g| g.status() == GlobalStatus::Stopped),
        }
    }

    fn drain_monitors(&mut self, sync_ts: Nanos) {
        let mut events = Vec::new();
        for m in 0..self.monitors.len() {
            events.clear();
            self.monitors[m].check_for_new_data(sync_ts, &mut events);
            for event in &events {
                match *event {
                    MonitorEvent::Checkpoint { id, timestamp } => {
                        for &c in &self.checkpoints_of_monitor[m] {
                            if self.checkpoint_ids[c] != id {
                                continue;
                            }
                            let snapshot = CheckpointSnapshot { checkpoint: c, id, timestamp };
                            for &(kind, index) in &self.checkpoint_watchers[c] {
                                match kind {
                                    SupervisionKind::Alive => {
                                        self.alives[index].on_checkpoint(snapshot)
                                    }
                                    SupervisionKind::Deadline => {
                                        self.deadlines[index].on_checkpoint(snapshot)
                                    }
                                    SupervisionKind::Logical => {
                                        self.logicals[index].on_checkpoint(snapshot)
                                    }
                                }
                            }
                        }
                    }
                    MonitorEvent::DataLoss => {
                        for &c in &self.checkpoints_of_monitor[m] {
                            for &(kind, index) in &self.checkpoint_watchers[c] {
                                match kind {
                                    SupervisionKind::Alive => self.alives[index].on_data_loss(0),
                                    SupervisionKind::Deadline => {
                                        self.deadlines[index].on_data_loss(0)
                                    }
                                    SupervisionKind::Logical => {
                                        self.logicals[index].on_data_loss(0)
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn process_index(&self, id: IdentifierHash) -> Option<ProcessIdx> {
        self.index_of.get(&id).copied()
    }

    /// Last known state of a mirrored process.
    pub fn process_state(&self, index: ProcessIdx) -> Option<hale_core::ProcessState> {
        self.mirrors.get(index).map(|m| m.state())
    }

    pub fn global_status(&self, index: usize) -> Option<GlobalStatus> {
        self.globals.get(index).map(|g| g.status())
    }

    pub fn notifier_state(&self, index: usize) -> Option<crate::recovery::NotifierState> {
        self.notifiers.get(index).map(|n| n.state())
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
