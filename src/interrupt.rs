//! Ctrl-C handling
//!
//! The first SIGINT cancels the session: the in-flight package manager call
//! finishes (it runs in its own process group) and everything not yet
//! started is skipped. A second SIGINT terminates immediately.

use reconcile::CancelToken;
use std::sync::OnceLock;

static TOKEN: OnceLock<CancelToken> = OnceLock::new();

/// Install the SIGINT handler and return the token it cancels.
pub fn install() -> CancelToken {
    let token = TOKEN.get_or_init(CancelToken::new).clone();
    install_handler();
    token
}

#[cfg(unix)]
fn install_handler() {
    // SAFETY: the handler only touches an atomic and re-installs SIG_DFL,
    // both async-signal-safe
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
fn install_handler() {}

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    if let Some(token) = TOKEN.get() {
        token.cancel();
    }
    // SAFETY: signal() is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}
