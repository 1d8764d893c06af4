// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Tick thread CPU pinning.
//!
//! The tick thread runs on a deadline and is pinned to a single core: the
//! configured one, or the last online CPU.

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("CPU {cpu} is not online (online: {online:?})")]
    NotOnline { cpu: usize, online: Vec<usize> },

    #[error("sched_setaffinity failed: {0}")]
    Sys(#[from] nix::Error),
}

/// Online CPUs, from sysfs. Falls back to `0..num_cpus` if unavailable.
pub fn online_cpus() -> Vec<usize> {
    let from_sysfs = std::fs::read_to_string("/sys/devices/system/cpu/online")
        .map(|list| parse_cpu_list(list.trim()))
        .unwrap_or_default();

    if from_sysfs.is_empty() {
        (0..num_cpus::get()).collect()
    } else {
        from_sysfs
    }
}

/// CPU the tick thread should run on.
pub fn choose_tick_cpu(requested: Option<usize>) -> Result<usize, AffinityError> {
    let online = online_cpus();
    match requested {
        Some(cpu) if online.contains(&cpu) => Ok(cpu),
        Some(cpu) => Err(AffinityError::NotOnline { cpu, online }),
        None => Ok(online.last().copied().unwrap_or(0)),
    }
}

/// Pin the calling thread to `cpu`.
pub fn pin_current_thread(cpu: usize) -> Result<(), AffinityError> {
    let mut cpuset = CpuSet::new();
    cpuset.set(cpu)?;
    // Pid 0 is the calling thread.
    sched_setaffinity(Pid::from_raw(0), &cpuset)?;

    tracing::debug!(cpu = cpu, "Tick thread pinned to CPU");
    Ok(())
}

/// Parse a CPU list string like "0-3,8-11" into a Vec of CPU indices.
fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus
}
