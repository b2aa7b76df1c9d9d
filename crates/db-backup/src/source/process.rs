use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    io::{self, Read},
    process::{Child, ChildStdout, Command, ExitStatus, Stdio},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, warn};

use super::{DumpError, DumpProcessError};

/// How often the watchdog checks on the dump process.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How much of the process' stderr is kept for error messages.
const STDERR_LIMIT: u64 = 64 * 1024;

/// An external process whose stdout is the dump.
#[derive(Clone)]
pub struct DumpProcess {
    /// The program to run.
    pub program: String,

    /// The program's arguments. Must not contain secrets.
    pub args: Vec<String>,

    /// Extra environment variables, used to hand over secrets.
    pub envs: Vec<(String, String)>,

    /// Kill the process if it runs for longer than this.
    pub timeout: Option<Duration>,
}

impl DumpProcess {
    /// Start the process.
    pub fn spawn(&self) -> Result<ProcessStream, DumpProcessError> {
        debug!("Running {} {}", self.program, self.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DumpProcessError::Spawn(self.program.clone(), e))?;

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            if let Err(error) = child.kill() {
                warn!("Could not kill '{}': {error}", self.program);
            }
            return Err(DumpProcessError::Spawn(
                self.program.clone(),
                io::Error::other("process pipes were not captured"),
            ));
        };

        // Drain stderr so the process never blocks on it.
        let stderr = thread::spawn(move || {
            let mut captured = Vec::new();
            let _ = (&mut stderr).take(STDERR_LIMIT).read_to_end(&mut captured);
            let _ = io::copy(&mut stderr, &mut io::sink());
            String::from_utf8_lossy(&captured).trim_end().to_string()
        });

        let cancel = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let cancel = Arc::clone(&cancel);
            let timeout = self.timeout;
            thread::spawn(move || watch(child, timeout, &cancel))
        };

        Ok(ProcessStream {
            program: self.program.clone(),
            timeout: self.timeout,
            stdout,
            stderr: Some(stderr),
            watchdog: Some(watchdog),
            cancel,
        })
    }
}

impl fmt::Debug for DumpProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<_> = self.envs.iter().map(|(key, _)| key).collect();

        f.debug_struct("DumpProcess")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &env_keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}

enum Exit {
    Status(ExitStatus),
    TimedOut,
    Cancelled,
}

fn watch(mut child: Child, timeout: Option<Duration>, cancel: &AtomicBool) -> io::Result<Exit> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Exit::Status(status));
        }

        let timed_out = timeout.is_some_and(|timeout| started.elapsed() >= timeout);
        let cancelled = cancel.load(Ordering::Relaxed);

        if timed_out || cancelled {
            child.kill()?;
            child.wait()?;

            return Ok(if timed_out {
                Exit::TimedOut
            } else {
                Exit::Cancelled
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// The stdout of a running dump process.
///
/// End of stream is only reported once the process has exited successfully;
/// otherwise the final read fails with a [`DumpError`]. Dropping the stream
/// before the end kills the process.
pub struct ProcessStream {
    program: String,
    timeout: Option<Duration>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    watchdog: Option<JoinHandle<io::Result<Exit>>>,
    cancel: Arc<AtomicBool>,
}

impl ProcessStream {
    fn finish(&mut self) -> Result<(), DumpProcessError> {
        let Some(watchdog) = self.watchdog.take() else {
            return Ok(());
        };

        let exit = watchdog
            .join()
            .map_err(|_| {
                DumpProcessError::Watch(self.program.clone(), io::Error::other("watchdog panicked"))
            })?
            .map_err(|e| DumpProcessError::Watch(self.program.clone(), e))?;

        let stderr = self
            .stderr
            .take()
            .and_then(|stderr| stderr.join().ok())
            .unwrap_or_default();

        match exit {
            Exit::Status(status) if status.success() => {
                debug!("'{}' finished", self.program);
                Ok(())
            }
            Exit::Status(status) => Err(DumpProcessError::Exited {
                program: self.program.clone(),
                status,
                stderr,
            }),
            Exit::TimedOut => Err(DumpProcessError::TimedOut {
                program: self.program.clone(),
                timeout: self.timeout.unwrap_or_default(),
            }),
            Exit::Cancelled => Err(DumpProcessError::Cancelled(self.program.clone())),
        }
    }
}

impl Read for ProcessStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.stdout.read(buf)?;

        if bytes_read == 0 && !buf.is_empty() {
            self.finish()
                .map_err(|e| io::Error::other(DumpError::Process(e)))?;
        }

        Ok(bytes_read)
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        if self.watchdog.is_some() {
            self.cancel.store(true, Ordering::Relaxed);
        }
    }
}
