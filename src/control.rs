//! Control-plane socket server
//!
//! A running instrumented process listens on a Unix domain socket whose path
//! is derived from its PID, so an external controller (`sprofctl`) can target
//! a specific instance. The protocol is plain text: one newline-terminated
//! command in, exactly one reply line out, strictly alternating. Unknown
//! input gets `Invalid Command` and never terminates the loop.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{sink, ConfigStore, ProfilerConfig};
use crate::error::Result;
use crate::registry::Registry;
use crate::report::{build_report, write_report};

/// Reply sent for any unrecognized command.
pub const INVALID_COMMAND: &str = "Invalid Command";

/// Control socket path for an arbitrary PID, as used by external controllers.
pub fn socket_path_for_pid(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("sprof-{}.sock", pid))
}

/// Control socket path for the current process.
pub fn default_socket_path() -> PathBuf {
    socket_path_for_pid(std::process::id())
}

/// Handle to a running control server; stopping (or dropping) it shuts the
/// listener down and removes the socket file.
pub struct ControlServerHandle {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ControlServerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signals the server loop and joins it.
    pub fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        // Poke the listener so a blocked accept wakes up.
        let _ = UnixStream::connect(&self.path);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ControlServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Listens on the control socket and serializes command handling: one
/// connection, one command at a time, each processed to completion before the
/// next is read.
pub struct ControlServer {
    registry: Arc<Registry>,
    config_store: Arc<ConfigStore>,
    settings: ProfilerConfig,
}

impl ControlServer {
    pub fn new(
        registry: Arc<Registry>,
        config_store: Arc<ConfigStore>,
        settings: ProfilerConfig,
    ) -> Self {
        Self {
            registry,
            config_store,
            settings,
        }
    }

    /// Binds the socket and spawns the accept loop.
    pub fn spawn(self) -> Result<ControlServerHandle> {
        let path = self
            .settings
            .control_socket
            .clone()
            .unwrap_or_else(default_socket_path);

        // A stale socket file from a previous run would make bind fail.
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }

        let listener = UnixListener::bind(&path).map_err(|err| {
            crate::error::Error::ControlChannel(format!(
                "cannot bind {}: {}",
                path.display(),
                err
            ))
        })?;
        info!("control server listening on {}", path.display());

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("sprof-control".to_string())
            .spawn(move || self.serve(listener, worker_shutdown))?;

        Ok(ControlServerHandle {
            path,
            shutdown,
            worker: Some(worker),
        })
    }

    fn serve(self, listener: UnixListener, shutdown: Arc<AtomicBool>) {
        for stream in listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(err) = self.handle_connection(stream, &shutdown) {
                        debug!("control connection ended: {}", err);
                    }
                }
                Err(err) => {
                    warn!("control accept failed: {}", err);
                }
            }
        }
        debug!("control server stopped");
    }

    fn handle_connection(&self, stream: UnixStream, shutdown: &AtomicBool) -> std::io::Result<()> {
        // A bounded read timeout keeps this loop responsive to the shutdown
        // flag while a controller holds the connection open without sending
        // anything; otherwise stop() would block on the join forever.
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let mut line = String::new();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match reader.read_line(&mut line) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    let reply = self.dispatch(line.trim());
                    writeln!(writer, "{}", reply)?;
                    writer.flush()?;
                    line.clear();
                }
                // Timeout expired with no command; any partial line stays
                // buffered in `line` for the next round.
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn dispatch(&self, command: &str) -> String {
        debug!("control command: {:?}", command);
        match command {
            "state" => self.config_store.describe(),
            "enable" => {
                self.config_store.set_enabled(true);
                self.config_store.add_sink(sink::FILE);
                "profiling enabled, reports go to file".to_string()
            }
            "disable" => {
                self.config_store.set_enabled(false);
                self.config_store.clear_sinks();
                "profiling disabled, sinks cleared".to_string()
            }
            "save" => {
                self.config_store.add_sink(sink::FILE);
                let report = build_report(&self.registry, self.config_store.sort_mode());
                write_report(
                    &report,
                    self.config_store.sinks(),
                    &self.settings.report_path,
                );
                format!("report saved ({} sections)", report.entries.len())
            }
            _ => INVALID_COMMAND.to_string(),
        }
    }
}

/// Sends one command over the control socket and returns the reply line.
///
/// Shared by `sprofctl` and the integration tests.
pub fn send_command(path: &Path, command: &str) -> std::io::Result<String> {
    let stream = UnixStream::connect(path)?;
    let mut writer = stream.try_clone()?;
    writeln!(writer, "{}", command)?;
    writer.flush()?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    Ok(reply.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_embeds_pid() {
        let path = socket_path_for_pid(4242);
        let name = path.file_name().unwrap().to_string_lossy();
        assert_eq!(name, "sprof-4242.sock");

        let own = default_socket_path();
        assert!(own
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains(&std::process::id().to_string()));
    }
}
