//! Processes from `/proc/<pid>`.

use std::collections::{BTreeMap, HashMap};

use hwsight_common::model::{OSProcess, ProcessState, UNKNOWN};
use tracing::trace;

use super::LinuxBackend;
use crate::decode::{Field, decode_longs, parse_u64_or, split_nul};
use crate::units::{clamp_start_time, ticks_to_millis};

/// Numeric fields of `/proc/<pid>/stat`, numbered as in proc(5).
const PROC_STAT_LAYOUT: [Field; 10] = [
    Field::new("ppid", 4),
    Field::new("minflt", 10),
    Field::new("majflt", 12),
    Field::new("utime", 14),
    Field::new("stime", 15),
    Field::new("priority", 18),
    Field::new("num_threads", 20),
    Field::new("starttime", 22),
    Field::new("vsize", 23),
    Field::new("rss", 24),
];

/// Raw per-process inputs.
#[derive(Debug, Clone, Default)]
pub struct ProcessSources {
    pub pid: u32,
    /// Empty when the process exited before it could be read.
    pub stat: String,
    pub status: BTreeMap<String, String>,
    pub io: BTreeMap<String, String>,
    pub cmdline: Vec<u8>,
    pub environ: Vec<u8>,
    pub exe: Option<String>,
    pub cwd: Option<String>,
    pub open_files: Option<usize>,
}

/// Time base and sizes needed to normalize stat fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessClock {
    pub boot_time_secs: u64,
    pub clock_ticks: u64,
    pub page_size: u64,
    pub now_ms: u64,
}

/// uid/gid -> name maps from the account databases.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    pub users: HashMap<String, String>,
    pub groups: HashMap<String, String>,
}

/// Parse `/etc/passwd` or `/etc/group` into id -> name.
pub fn parse_account_db(lines: &[String]) -> HashMap<String, String> {
    lines
        .iter()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| {
            let mut fields = l.split(':');
            let name = fields.next()?;
            let id = fields.nth(1)?;
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

/// Split a stat line into tokens indexed by proc(5) field number.
///
/// The command name may contain spaces and parentheses, so everything after
/// the last `)` is split on whitespace. Index 0 is padding.
fn stat_tokens(stat: &str) -> Option<(Vec<&str>, &str)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?;
    let mut tokens = vec!["", stat[..open].trim(), comm];
    tokens.extend(stat[close + 1..].split_whitespace());
    Some((tokens, comm))
}

/// Map the single-letter stat state.
pub fn process_state(code: &str) -> ProcessState {
    match code.chars().next() {
        Some('R') => ProcessState::Running,
        Some('S') => ProcessState::Sleeping,
        Some('D' | 'I' | 'W') => ProcessState::Waiting,
        Some('T' | 't') => ProcessState::Stopped,
        Some('Z') => ProcessState::Zombie,
        _ => ProcessState::Other,
    }
}

/// Unclamped start time in epoch milliseconds, from the stat start tick.
pub fn raw_start_millis(clock: &ProcessClock, start_ticks: u64) -> u64 {
    let hz = u128::from(clock.clock_ticks.max(1));
    let start = (u128::from(clock.boot_time_secs) * hz + u128::from(start_ticks)) * 1000 / hz;
    u64::try_from(start).unwrap_or(u64::MAX)
}

/// Build one process; an empty or malformed stat yields the invalid sentinel.
pub fn build_process(src: ProcessSources, clock: &ProcessClock, accounts: &Accounts) -> OSProcess {
    let Some((tokens, comm)) = stat_tokens(&src.stat) else {
        trace!("Process {} vanished before it could be read", src.pid);
        return OSProcess::invalid(src.pid);
    };
    let [ppid, minflt, majflt, utime, stime, priority, threads, starttime, vsize, rss] =
        decode_longs(&tokens, &PROC_STAT_LAYOUT);
    let unsigned = |v: i64| v.max(0) as u64;

    let raw_start_time = raw_start_millis(clock, unsigned(starttime));
    let (start_time, up_time) = clamp_start_time(raw_start_time, clock.now_ms);

    let status_u64 = |key: &str| src.status.get(key).map_or(0, |v| parse_u64_or(v, 0));
    let first_id = |key: &str| {
        src.status
            .get(key)
            .and_then(|v| v.split_whitespace().next())
            .unwrap_or(UNKNOWN)
            .to_string()
    };
    let user_id = first_id("Uid");
    let group_id = first_id("Gid");
    let lookup = |db: &HashMap<String, String>, id: &str| {
        db.get(id).cloned().unwrap_or_else(|| UNKNOWN.to_string())
    };

    let arguments = split_nul(&src.cmdline);
    let environment = split_nul(&src.environ)
        .into_iter()
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect();

    OSProcess {
        process_id: src.pid,
        parent_process_id: unsigned(ppid) as u32,
        name: src
            .status
            .get("Name")
            .cloned()
            .unwrap_or_else(|| comm.to_string()),
        path: src.exe.unwrap_or_default(),
        command_line: arguments.join(" "),
        arguments,
        environment,
        current_working_directory: src.cwd.unwrap_or_default(),
        user: lookup(&accounts.users, &user_id),
        user_id,
        group: lookup(&accounts.groups, &group_id),
        group_id,
        state: process_state(tokens.get(3).copied().unwrap_or("")),
        thread_count: unsigned(threads) as u32,
        priority: priority as i32,
        virtual_size: unsigned(vsize),
        resident_set_size: unsigned(rss).saturating_mul(clock.page_size),
        kernel_time: ticks_to_millis(unsigned(stime), clock.clock_ticks),
        user_time: ticks_to_millis(unsigned(utime), clock.clock_ticks),
        start_time,
        up_time,
        raw_start_time,
        bytes_read: src.io.get("read_bytes").map_or(0, |v| parse_u64_or(v, 0)),
        bytes_written: src.io.get("write_bytes").map_or(0, |v| parse_u64_or(v, 0)),
        open_files: src.open_files.map_or(-1, |n| n as i64),
        minor_faults: unsigned(minflt),
        major_faults: unsigned(majflt),
        context_switches: status_u64("voluntary_ctxt_switches")
            + status_u64("nonvoluntary_ctxt_switches"),
    }
}

impl LinuxBackend {
    pub(super) fn process_clock(&self) -> ProcessClock {
        ProcessClock {
            boot_time_secs: self.boot_time_secs(),
            clock_ticks: self.clock_ticks(),
            page_size: self.page_size(),
            now_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    pub(super) fn accounts(&self) -> Accounts {
        Accounts {
            users: parse_account_db(&self.text.read_lines(&self.etc_path("passwd"))),
            groups: parse_account_db(&self.text.read_lines(&self.etc_path("group"))),
        }
    }

    fn process_sources(&self, pid: u32) -> ProcessSources {
        let dir = self.proc_path(pid.to_string());
        let link = |name: &str| {
            self.text
                .read_link(&dir.join(name))
                .map(|p| p.display().to_string())
        };
        let fd_dir = dir.join("fd");
        ProcessSources {
            pid,
            stat: self.text.read_string(&dir.join("stat")).unwrap_or_default(),
            status: self.text.read_key_values(&dir.join("status"), ':'),
            io: self.text.read_key_values(&dir.join("io"), ':'),
            cmdline: self.text.read_bytes(&dir.join("cmdline")).unwrap_or_default(),
            environ: self.text.read_bytes(&dir.join("environ")).unwrap_or_default(),
            exe: link("exe"),
            cwd: link("cwd"),
            open_files: self
                .text
                .exists(&fd_dir)
                .then(|| self.text.list_dir(&fd_dir).len()),
        }
    }

    pub(super) fn process(
        &self,
        pid: u32,
        clock: &ProcessClock,
        accounts: &Accounts,
    ) -> Option<OSProcess> {
        Some(build_process(self.process_sources(pid), clock, accounts)).filter(OSProcess::is_valid)
    }

    pub(super) fn all_processes(&self) -> Vec<OSProcess> {
        let clock = self.process_clock();
        let accounts = self.accounts();
        self.text
            .list_dir(&self.proc_path(""))
            .iter()
            .filter_map(|entry| entry.parse::<u32>().ok())
            .filter_map(|pid| self.process(pid, &clock, &accounts))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HZ: u64 = 100;
    const BOOT: u64 = 1_700_000_000;

    fn clock(now_ms: u64) -> ProcessClock {
        ProcessClock {
            boot_time_secs: BOOT,
            clock_ticks: HZ,
            page_size: 4096,
            now_ms,
        }
    }

    /// Stat line with ppid 1, 4 threads, start tick 500, vsize 204800 and
    /// 50 resident pages.
    const STAT: &str = "4242 (my (odd) proc) S 1 4242 4242 0 -1 4194560 \
        1200 0 3 0 250 75 0 0 20 0 4 0 500 204800 50 18446744073709551615 \
        1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";

    fn status() -> BTreeMap<String, String> {
        [
            ("Name", "odd"),
            ("Uid", "1000\t1000\t1000\t1000"),
            ("Gid", "100\t100\t100\t100"),
            ("voluntary_ctxt_switches", "12"),
            ("nonvoluntary_ctxt_switches", "3"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_stat_fields() {
        let src = ProcessSources {
            pid: 4242,
            stat: STAT.to_string(),
            status: status(),
            cmdline: b"/usr/bin/odd\0--flag\0".to_vec(),
            environ: b"HOME=/home/u\0LANG=C\0".to_vec(),
            open_files: Some(7),
            ..Default::default()
        };
        let accounts = Accounts {
            users: HashMap::from([("1000".to_string(), "alice".to_string())]),
            groups: HashMap::new(),
        };
        let now = (BOOT + 3600) * 1000;
        let p = build_process(src, &clock(now), &accounts);

        assert!(p.is_valid());
        assert_eq!(p.parent_process_id, 1);
        assert_eq!(p.thread_count, 4);
        assert_eq!(p.virtual_size, 204_800);
        assert_eq!(p.resident_set_size, 204_800);
        assert_eq!(p.minor_faults, 1200);
        assert_eq!(p.major_faults, 3);
        assert_eq!(p.user_time, 2_500);
        assert_eq!(p.kernel_time, 750);
        assert_eq!(p.priority, 20);
        assert_eq!(p.state, ProcessState::Sleeping);
        assert_eq!(p.start_time, BOOT * 1000 + 5_000);
        assert_eq!(p.up_time, 3_595_000);
        assert_eq!(p.name, "odd");
        assert_eq!(p.user, "alice");
        assert_eq!(p.group, UNKNOWN);
        assert_eq!(p.command_line, "/usr/bin/odd --flag");
        assert_eq!(p.environment["LANG"], "C");
        assert_eq!(p.context_switches, 15);
        assert_eq!(p.open_files, 7);
    }

    #[test]
    fn test_start_time_clamp() {
        // started "after" now because of clock skew
        let now = BOOT * 1000 + 4_000;
        let raw = raw_start_millis(&clock(now), 500);
        assert_eq!(raw, BOOT * 1000 + 5_000);

        let (start, up) = clamp_start_time(raw, now);
        assert_eq!(start, now - 1);
        assert_eq!(up, 1);

        let (start, up) = clamp_start_time(raw, raw);
        assert_eq!(start, BOOT * 1000 + 4_999);
        assert_eq!(up, 1);
    }

    #[test]
    fn test_clamped_start_keeps_raw_start() {
        let src = || ProcessSources {
            pid: 4242,
            stat: STAT.to_string(),
            ..Default::default()
        };
        let accounts = Accounts::default();
        let first = build_process(src(), &clock(BOOT * 1000 + 4_000), &accounts);
        let second = build_process(src(), &clock(BOOT * 1000 + 4_020), &accounts);

        assert_ne!(first.start_time, second.start_time);
        assert_eq!(first.up_time, 1);
        assert_eq!(first.raw_start_time, BOOT * 1000 + 5_000);
        assert_eq!(first.raw_start_time, second.raw_start_time);
    }

    #[test]
    fn test_empty_stat_is_invalid() {
        let src = ProcessSources {
            pid: 77,
            ..Default::default()
        };
        let p = build_process(src, &clock(1), &Accounts::default());
        assert_eq!(p.process_id, 77);
        assert!(!p.is_valid());
    }

    #[test]
    fn test_account_db() {
        let lines: Vec<String> = ["root:x:0:0:root:/root:/bin/bash", "# comment", "bad"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let db = parse_account_db(&lines);
        assert_eq!(db["0"], "root");
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_process_state_codes() {
        assert_eq!(process_state("R"), ProcessState::Running);
        assert_eq!(process_state("D"), ProcessState::Waiting);
        assert_eq!(process_state("Z"), ProcessState::Zombie);
        assert_eq!(process_state("X"), ProcessState::Other);
    }
}
