//! In-memory stand-in for the `zfs` and `zpool` tools
//!
//! [`FakeZfs`] understands exactly the command lines the engine issues and
//! keeps a small model of datasets, snapshots, mountpoints and pool
//! altroots. Every command is recorded so tests can assert on ordering.

use async_trait::async_trait;
use snapferry_types::{CommandOutput, CommandRunner, CommandSpec, Error, Invocation, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct Dataset {
    snapshots: Vec<String>,
    mountpoint: Option<String>,
    mounted: bool,
}

#[derive(Debug, Default)]
struct State {
    datasets: BTreeMap<String, Dataset>,
    altroots: HashMap<String, String>,
    log: Vec<String>,
    altroot_lookups: usize,
}

impl State {
    /// Create `name` and any missing parents
    fn create(&mut self, name: &str) -> &mut Dataset {
        let mut path = String::new();
        for segment in name.split('/') {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            self.datasets.entry(path.clone()).or_default();
        }
        self.datasets.entry(path).or_default()
    }
}

/// Scriptable fake ZFS host
#[derive(Debug, Default)]
pub struct FakeZfs {
    state: Mutex<State>,
    failures: Vec<String>,
    transfer_delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeZfs {
    /// Create a host with no datasets
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset and its parents, holding `snapshots`, oldest first
    pub fn with_filesystem(self, name: &str, snapshots: &[&str]) -> Self {
        {
            let mut state = self.lock();
            let dataset = state.create(name);
            dataset
                .snapshots
                .extend(snapshots.iter().map(|s| (*s).to_string()));
        }
        self
    }

    /// Give a dataset a mountpoint property and mount it
    pub fn with_mountpoint(self, name: &str, mountpoint: &str) -> Self {
        {
            let mut state = self.lock();
            let dataset = state.create(name);
            dataset.mountpoint = Some(mountpoint.to_string());
            dataset.mounted = true;
        }
        self
    }

    /// Set the altroot of `pool`
    pub fn with_altroot(self, pool: &str, altroot: &str) -> Self {
        self.lock()
            .altroots
            .insert(pool.to_string(), altroot.to_string());
        self
    }

    /// Fail every command whose text contains `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_string());
        self
    }

    /// Make each send/receive take `delay`
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = Some(delay);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Commands whose text starts with `prefix`
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    /// Commands that change state
    pub fn side_effects(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| {
                ["zfs create", "zfs send", "zfs unmount", "zfs set"]
                    .iter()
                    .any(|prefix| command.starts_with(prefix))
            })
            .collect()
    }

    /// Snapshots of `name`, `None` when the dataset does not exist
    pub fn snapshots(&self, name: &str) -> Option<Vec<String>> {
        self.lock()
            .datasets
            .get(name)
            .map(|dataset| dataset.snapshots.clone())
    }

    /// Mountpoint property of `name`
    pub fn mountpoint(&self, name: &str) -> Option<String> {
        self.lock()
            .datasets
            .get(name)
            .and_then(|dataset| dataset.mountpoint.clone())
    }

    /// Whether `name` is currently mounted
    pub fn is_mounted(&self, name: &str) -> bool {
        self.lock()
            .datasets
            .get(name)
            .map_or(false, |dataset| dataset.mounted)
    }

    /// Number of `zpool get altroot` calls
    pub fn altroot_lookups(&self) -> usize {
        self.lock().altroot_lookups
    }

    /// Highest number of transfers observed running at once
    pub fn peak_transfers(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn failure(command: &str, message: String) -> Error {
        Error::Command {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stderr: message,
        }
    }

    fn dispatch(&self, line: &str, stage: &Invocation) -> Result<String> {
        let args: Vec<&str> = stage.args.iter().map(String::as_str).collect();
        let tool = stage.program.rsplit('/').next().unwrap_or_default();
        let mut state = self.lock();

        match (tool, args.as_slice()) {
            ("zfs", ["list", "-H", "-r", "-t", "snapshot", "-o", "name", roots @ ..]) => {
                let mut out = String::new();
                for root in roots {
                    if !state.datasets.contains_key(*root) {
                        return Err(Self::failure(
                            line,
                            format!("cannot open '{}': dataset does not exist", root),
                        ));
                    }
                    let nested = format!("{}/", root);
                    for (name, dataset) in &state.datasets {
                        if name.as_str() == *root || name.starts_with(&nested) {
                            for snapshot in &dataset.snapshots {
                                out.push_str(&format!("{}@{}\n", name, snapshot));
                            }
                        }
                    }
                }
                Ok(out)
            }
            ("zfs", ["list", "-H", "-o", "name,mountpoint", names @ ..]) => {
                let mut out = String::new();
                for name in names {
                    let dataset = state.datasets.get(*name).ok_or_else(|| {
                        Self::failure(line, format!("cannot open '{}': dataset does not exist", name))
                    })?;
                    let altroot = state.altroots.get(pool_of(name)).cloned().unwrap_or_default();
                    let shown = match &dataset.mountpoint {
                        Some(mp) if mp.starts_with('/') => format!("{}{}", altroot.trim_end_matches('/'), mp),
                        Some(mp) => mp.clone(),
                        None => "-".to_string(),
                    };
                    out.push_str(&format!("{}\t{}\n", name, shown));
                }
                Ok(out)
            }
            ("zpool", ["get", "altroot", "-H", "-o", "value", pool]) => {
                state.altroot_lookups += 1;
                Ok(format!(
                    "{}\n",
                    state.altroots.get(*pool).map_or("-", String::as_str)
                ))
            }
            ("zfs", ["create", "-p", target]) => {
                state.create(target);
                Ok(String::new())
            }
            ("zfs", ["unmount", "-f", name]) => match state.datasets.get_mut(*name) {
                Some(dataset) if dataset.mounted => {
                    dataset.mounted = false;
                    Ok(String::new())
                }
                Some(_) => Err(Self::failure(
                    line,
                    format!("cannot unmount '{}': not currently mounted", name),
                )),
                None => Err(Self::failure(
                    line,
                    format!("cannot open '{}': dataset does not exist", name),
                )),
            },
            ("zfs", ["set", property, name]) => {
                let mountpoint = property
                    .strip_prefix("mountpoint=")
                    .ok_or_else(|| Self::failure(line, format!("unsupported property {}", property)))?;
                let dataset = state.datasets.get_mut(*name).ok_or_else(|| {
                    Self::failure(line, format!("cannot open '{}': dataset does not exist", name))
                })?;
                dataset.mountpoint = Some(mountpoint.to_string());
                dataset.mounted = true;
                Ok(String::new())
            }
            _ => Err(Self::failure(line, format!("unsupported command: {}", line))),
        }
    }

    fn receive(&self, line: &str, send: &Invocation, recv: &Invocation) -> Result<()> {
        let (from, to) = match send.args.as_slice() {
            [verb, to] if verb == "send" => (None, to.as_str()),
            [verb, flag, from, to] if verb == "send" && flag == "-i" => {
                (Some(from.as_str()), to.as_str())
            }
            _ => return Err(Self::failure(line, "malformed send".to_string())),
        };
        let target = match recv.args.as_slice() {
            [verb, force, target] if verb == "recv" && force == "-F" => target.as_str(),
            _ => return Err(Self::failure(line, "malformed recv".to_string())),
        };

        let (source, snapshot) = to
            .split_once('@')
            .ok_or_else(|| Self::failure(line, format!("not a snapshot: {}", to)))?;

        let mut state = self.lock();
        let exists = state
            .datasets
            .get(source)
            .map_or(false, |dataset| dataset.snapshots.iter().any(|s| s == snapshot));
        if !exists {
            return Err(Self::failure(
                line,
                format!("cannot open '{}': dataset does not exist", to),
            ));
        }

        let backup = state.datasets.entry(target.to_string()).or_default();
        if let Some(from) = from {
            let base = from.split_once('@').map_or(from, |(_, snap)| snap);
            let position = backup
                .snapshots
                .iter()
                .position(|s| s == base)
                .ok_or_else(|| {
                    Self::failure(
                        line,
                        format!("cannot receive incremental stream: {} not on {}", base, target),
                    )
                })?;
            // recv -F rolls the target back to the base first
            backup.snapshots.truncate(position + 1);
        } else {
            backup.snapshots.clear();
        }
        backup.snapshots.push(snapshot.to_string());
        Ok(())
    }
}

fn pool_of(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

#[async_trait]
impl CommandRunner for FakeZfs {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let line = command.to_string();
        self.lock().log.push(line.clone());

        if let Some(needle) = self.failures.iter().find(|needle| line.contains(needle.as_str())) {
            return Err(Self::failure(&line, format!("injected failure on {}", needle)));
        }

        match command.stages.as_slice() {
            [stage] => self.dispatch(&line, stage).map(CommandOutput::from_stdout),
            [send, recv] => {
                let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
                if let Some(delay) = self.transfer_delay {
                    tokio::time::sleep(delay).await;
                } else {
                    tokio::task::yield_now().await;
                }
                let result = self.receive(&line, send, recv);
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result.map(|()| CommandOutput::default())
            }
            _ => Err(Self::failure(&line, "unsupported pipeline".to_string())),
        }
    }
}
