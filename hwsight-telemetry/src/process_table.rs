//! Process sampling through `sysinfo`, for platforms without procfs.

use std::collections::BTreeMap;

use hwsight_common::model::{OSProcess, ProcessState, UNKNOWN};
use sysinfo::{
    Groups, Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, Users,
};

use crate::units::clamp_start_time;

/// Plain values copied out of a `sysinfo` process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub cmd: Vec<String>,
    pub environ: Vec<String>,
    pub cwd: Option<String>,
    pub user_id: Option<String>,
    pub user: Option<String>,
    pub group_id: Option<String>,
    pub group: Option<String>,
    pub state: ProcessState,
    pub thread_count: Option<u32>,
    pub memory: u64,
    pub virtual_memory: u64,
    /// Epoch seconds.
    pub start_time_secs: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Map a `sysinfo` status.
pub fn process_state(status: ProcessStatus) -> ProcessState {
    match status {
        ProcessStatus::Run => ProcessState::Running,
        ProcessStatus::Sleep | ProcessStatus::Idle | ProcessStatus::Parked => {
            ProcessState::Sleeping
        }
        ProcessStatus::UninterruptibleDiskSleep
        | ProcessStatus::LockBlocked
        | ProcessStatus::Waking
        | ProcessStatus::Wakekill => ProcessState::Waiting,
        ProcessStatus::Stop | ProcessStatus::Tracing => ProcessState::Stopped,
        ProcessStatus::Zombie | ProcessStatus::Dead => ProcessState::Zombie,
        _ => ProcessState::Other,
    }
}

/// Build a process from a snapshot taken at `now_ms`.
pub fn build_process(snapshot: ProcessSnapshot, now_ms: u64) -> OSProcess {
    let raw_start_time = snapshot.start_time_secs.saturating_mul(1000);
    let (start_time, up_time) = clamp_start_time(raw_start_time, now_ms);
    let unknown = || UNKNOWN.to_string();
    let environment: BTreeMap<String, String> = snapshot
        .environ
        .iter()
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect();

    OSProcess {
        process_id: snapshot.pid,
        parent_process_id: snapshot.parent_pid.unwrap_or(0),
        name: snapshot.name,
        path: snapshot.exe.unwrap_or_default(),
        command_line: snapshot.cmd.join(" "),
        arguments: snapshot.cmd,
        environment,
        current_working_directory: snapshot.cwd.unwrap_or_default(),
        user: snapshot.user.unwrap_or_else(unknown),
        user_id: snapshot.user_id.unwrap_or_else(unknown),
        group: snapshot.group.unwrap_or_else(unknown),
        group_id: snapshot.group_id.unwrap_or_else(unknown),
        state: snapshot.state,
        thread_count: snapshot.thread_count.unwrap_or(1),
        virtual_size: snapshot.virtual_memory,
        resident_set_size: snapshot.memory,
        start_time,
        up_time,
        raw_start_time,
        bytes_read: snapshot.bytes_read,
        bytes_written: snapshot.bytes_written,
        open_files: -1,
        ..OSProcess::default()
    }
}

#[cfg(unix)]
fn id_text<T: std::ops::Deref<Target = u32>>(id: &T) -> Option<String> {
    Some((**id).to_string())
}

#[cfg(not(unix))]
fn id_text<T>(_id: &T) -> Option<String> {
    None
}

fn snapshot(process: &Process, users: &Users, groups: &Groups) -> ProcessSnapshot {
    let lossy = |s: &std::ffi::OsStr| s.to_string_lossy().into_owned();
    let uid = process.user_id();
    let gid = process.group_id();
    let usage = process.disk_usage();
    ProcessSnapshot {
        pid: process.pid().as_u32(),
        parent_pid: process.parent().map(|p| p.as_u32()),
        name: lossy(process.name()),
        exe: process.exe().map(|p| p.display().to_string()),
        cmd: process.cmd().iter().map(|s| lossy(s)).collect(),
        environ: process.environ().iter().map(|s| lossy(s)).collect(),
        cwd: process.cwd().map(|p| p.display().to_string()),
        user_id: uid.and_then(id_text),
        user: uid
            .and_then(|uid| users.get_user_by_id(uid))
            .map(|u| u.name().to_string()),
        group_id: gid.as_ref().and_then(id_text),
        group: gid.and_then(|gid| {
            groups
                .list()
                .iter()
                .find(|g| *g.id() == gid)
                .map(|g| g.name().to_string())
        }),
        state: process_state(process.status()),
        thread_count: process.tasks().map(|t| t.len() as u32).filter(|n| *n > 0),
        memory: process.memory(),
        virtual_memory: process.virtual_memory(),
        start_time_secs: process.start_time(),
        bytes_read: usage.total_read_bytes,
        bytes_written: usage.total_written_bytes,
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Sample processes. A new `System` is refreshed on each call so nothing is
/// cached between queries.
pub fn sample(pids: Option<&[u32]>) -> Vec<OSProcess> {
    let mut system = System::new();
    let targets: Vec<Pid> = pids
        .unwrap_or_default()
        .iter()
        .map(|p| Pid::from_u32(*p))
        .collect();
    let which = match pids {
        Some(_) => ProcessesToUpdate::Some(&targets),
        None => ProcessesToUpdate::All,
    };
    system.refresh_processes_specifics(which, true, ProcessRefreshKind::everything());

    let users = Users::new_with_refreshed_list();
    let groups = Groups::new_with_refreshed_list();
    let now = now_ms();
    let mut processes: Vec<OSProcess> = system
        .processes()
        .values()
        .map(|p| build_process(snapshot(p, &users, &groups), now))
        .collect();
    processes.sort_by_key(|p| p.process_id);
    processes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_process() {
        let snapshot = ProcessSnapshot {
            pid: 501,
            parent_pid: Some(1),
            name: "Finder".to_string(),
            cmd: vec!["/System/Finder".to_string(), "-psn".to_string()],
            environ: vec!["LANG=C".to_string(), "junk".to_string()],
            state: ProcessState::Running,
            memory: 1 << 20,
            virtual_memory: 1 << 30,
            start_time_secs: 1_000,
            ..Default::default()
        };
        let p = build_process(snapshot, 1_060_000);
        assert_eq!(p.parent_process_id, 1);
        assert_eq!(p.command_line, "/System/Finder -psn");
        assert_eq!(p.environment.len(), 1);
        assert_eq!(p.start_time, 1_000_000);
        assert_eq!(p.up_time, 60_000);
        assert_eq!(p.user, UNKNOWN);
        assert_eq!(p.thread_count, 1);
        assert!(p.is_valid());
    }

    #[test]
    fn test_start_in_future_is_clamped() {
        let snapshot = ProcessSnapshot {
            start_time_secs: 2_000,
            state: ProcessState::Running,
            ..Default::default()
        };
        let p = build_process(snapshot, 1_000_000);
        assert_eq!(p.up_time, 1);
        assert_eq!(p.start_time, 999_999);
        assert_eq!(p.raw_start_time, 2_000_000);
    }

    #[test]
    fn test_sample_current_process() {
        let pid = std::process::id();
        let sampled = sample(Some(&[pid]));
        let me = sampled.iter().find(|p| p.process_id == pid);
        assert!(me.is_some());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(process_state(ProcessStatus::Run), ProcessState::Running);
        assert_eq!(process_state(ProcessStatus::Zombie), ProcessState::Zombie);
        assert_eq!(process_state(ProcessStatus::Unknown(9)), ProcessState::Other);
    }
}
