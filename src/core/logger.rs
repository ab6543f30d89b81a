//! Logging facilities: simulation messages and per-entity state audit dumps.

use std::fs::File;

use log::Level;
use serde::Serialize;

use dslab_core::context::SimulationContext;
use dslab_core::{log_debug, log_error, log_info, log_trace, log_warn};

use crate::core::resource_pool::ResourcePool;

pub trait Logger {
    fn log_error(&mut self, ctx: &SimulationContext, log: String);

    fn log_warn(&mut self, ctx: &SimulationContext, log: String);

    fn log_info(&mut self, ctx: &SimulationContext, log: String);

    fn log_debug(&mut self, ctx: &SimulationContext, log: String);

    fn log_trace(&mut self, ctx: &SimulationContext, log: String);

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error>;
}

/// Logger which passes messages to the standard log facade.
#[derive(Default)]
pub struct StdoutLogger {}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {}
    }
}

impl Logger for StdoutLogger {
    fn log_error(&mut self, ctx: &SimulationContext, log: String) {
        log_error!(ctx, log);
    }

    fn log_warn(&mut self, ctx: &SimulationContext, log: String) {
        log_warn!(ctx, log);
    }

    fn log_info(&mut self, ctx: &SimulationContext, log: String) {
        log_info!(ctx, log);
    }

    fn log_debug(&mut self, ctx: &SimulationContext, log: String) {
        log_debug!(ctx, log);
    }

    fn log_trace(&mut self, ctx: &SimulationContext, log: String) {
        log_trace!(ctx, log);
    }

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: f64,
    component: String,
    level: String,
    message: String,
}

/// Logger which collects messages in memory and saves them to a CSV file on demand.
pub struct FileLogger {
    log: Vec<LogEntry>,
    level: Level,
}

impl Default for FileLogger {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            level: Level::Info,
        }
    }
}

impl FileLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self { log: Vec::new(), level }
    }

    fn log_internal(&mut self, ctx: &SimulationContext, message: String, level: Level) {
        if self.level < level {
            return;
        }
        self.log.push(LogEntry {
            timestamp: ctx.time(),
            component: ctx.name().to_string(),
            level: level.to_string(),
            message,
        });
    }
}

impl Logger for FileLogger {
    fn log_error(&mut self, ctx: &SimulationContext, log: String) {
        self.log_internal(ctx, log, Level::Error)
    }

    fn log_warn(&mut self, ctx: &SimulationContext, log: String) {
        self.log_internal(ctx, log, Level::Warn)
    }

    fn log_info(&mut self, ctx: &SimulationContext, log: String) {
        self.log_internal(ctx, log, Level::Info)
    }

    fn log_debug(&mut self, ctx: &SimulationContext, log: String) {
        self.log_internal(ctx, log, Level::Debug)
    }

    fn log_trace(&mut self, ctx: &SimulationContext, log: String) {
        self.log_internal(ctx, log, Level::Trace)
    }

    fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for entry in &self.log {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// One row of the per-entity state audit dump.
#[derive(Serialize)]
struct StateLogRow<'a> {
    entity: &'a str,
    id: u32,
    time: f64,
    allocated: f64,
    requested: f64,
    /// `active` for hosts, `in_migration` for VMs and containers.
    flag: bool,
}

/// Saves the state logs of all entities in the pool to a CSV file.
///
/// Covers hosts, VMs and containers alive at the time of the call; state of
/// already destroyed entities is dropped together with the entity.
pub fn save_state_log(pool: &ResourcePool, path: &str) -> Result<(), std::io::Error> {
    let file = File::create(path)?;
    let mut wtr = csv::Writer::from_writer(file);
    for host_id in pool.host_ids() {
        for entry in pool.host(host_id).state_log.entries() {
            wtr.serialize(StateLogRow {
                entity: "host",
                id: host_id,
                time: entry.time,
                allocated: entry.allocated,
                requested: entry.requested,
                flag: entry.flag,
            })?;
        }
    }
    for vm_id in pool.vm_ids() {
        for entry in pool.vm(vm_id).state_log.entries() {
            wtr.serialize(StateLogRow {
                entity: "vm",
                id: vm_id,
                time: entry.time,
                allocated: entry.allocated,
                requested: entry.requested,
                flag: entry.flag,
            })?;
        }
    }
    for container_id in pool.container_ids() {
        for entry in pool.container(container_id).state_log.entries() {
            wtr.serialize(StateLogRow {
                entity: "container",
                id: container_id,
                time: entry.time,
                allocated: entry.allocated,
                requested: entry.requested,
                flag: entry.flag,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}
