//! Ephemeral port assignment for worker processes.

use std::io;
use std::net::TcpListener;

/// Ask the OS for a free TCP port by binding to `127.0.0.1:0` and reading the
/// chosen address. The listener is dropped before returning so the port is
/// free again by the time the child binds it. No port-range bookkeeping.
pub fn find_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_a_nonzero_port() {
        let port = find_free_port().expect("port allocation failed");
        assert_ne!(port, 0);
    }

    #[test]
    fn port_is_bindable_after_return() {
        let port = find_free_port().expect("port allocation failed");
        // The listener was dropped, so a new bind on the same port succeeds.
        TcpListener::bind(("127.0.0.1", port)).expect("port was not released");
    }
}
