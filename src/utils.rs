use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use pnet::datalink::{self, NetworkInterface};

/// Turn a client-supplied path into a path relative to a served root.
///
/// Empty and `.` segments are dropped and leading separators stripped.
/// Returns `None` when any segment is `..`, whatever its position.
pub fn sanitize_path(requested: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();

    for segment in requested.split(['/', '\\']) {
        match segment {
            ".." => return None,
            "" | "." => continue,
            s => clean.push(s),
        }
    }

    Some(clean)
}

/// Look up a network interface by name.
pub fn find_interface(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| anyhow!("Interface '{}' not found", name))
}

/// One-line summary of an interface: name, state, MAC and addresses.
pub fn describe_interface(iface: &NetworkInterface) -> String {
    let status = if iface.is_up() { "UP" } else { "DOWN" };
    let mac = iface
        .mac
        .map(|m| m.to_string())
        .unwrap_or_else(|| "no MAC".to_string());
    let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();

    format!(
        "{}: {} {} [{}]",
        iface.name,
        status,
        mac,
        if ips.is_empty() {
            "no IP".to_string()
        } else {
            ips.join(", ")
        }
    )
}

/// Pin a socket to one interface (`SO_BINDTODEVICE`).
#[cfg(target_os = "linux")]
pub fn bind_to_device(socket: &socket2::Socket, interface: &str) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let name = interface.as_bytes();
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr() as *const libc::c_void,
            name.len() as libc::socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// No-op on platforms without `SO_BINDTODEVICE`.
#[cfg(not(target_os = "linux"))]
pub fn bind_to_device(_socket: &socket2::Socket, _interface: &str) -> io::Result<()> {
    Ok(())
}
