// SIGINT / SIGTERM turn into a cancellation request. The handler only flips an
// atomic flag; the orchestrator notices it at the next phase boundary.

use std::io;
use std::sync::OnceLock;

use crate::orchestrator::CancellationToken;

static STOP_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

extern "C" fn handle_stop_signal(_signum: libc::c_int) {
    if let Some(token) = STOP_TOKEN.get() {
        token.cancel();
    }
}

/// Installs the SIGINT and SIGTERM handlers for `token`. Only the first token
/// registered in the process is ever signalled.
pub fn install_handlers(token: &CancellationToken) -> io::Result<()> {
    if STOP_TOKEN.set(token.clone()).is_err() {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, "Signal handlers already installed"));
    }

    let handler = handle_stop_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        let previous = unsafe { libc::signal(signum, handler) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
