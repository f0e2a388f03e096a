use std::io;
use std::net::{IpAddr, UdpSocket};
use std::process::Command;

/// Identity of the machine this node runs on.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub hostname: String,
    pub local_ip: Option<IpAddr>,
}

pub fn get_device_info() -> Result<DeviceInfo, io::Error> {
    Ok(DeviceInfo {
        hostname: get_hostname()?,
        local_ip: get_primary_local_ip().ok(),
    })
}

/// Resolves the hostname from the environment, `/etc/hostname`, then the
/// `hostname` command, in that order.
pub fn get_hostname() -> Result<String, io::Error> {
    if let Some(name) = ["HOSTNAME", "COMPUTERNAME", "HOST"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
    {
        return Ok(name);
    }

    if let Ok(content) = std::fs::read_to_string("/etc/hostname") {
        let content = content.trim();
        if !content.is_empty() {
            return Ok(content.to_string());
        }
    }

    let output = Command::new("hostname").output()?;
    let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !hostname.is_empty() {
        Ok(hostname)
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine hostname",
        ))
    }
}

/// Address of the interface used for outbound traffic. No packet is sent.
pub fn get_primary_local_ip() -> Result<IpAddr, io::Error> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    let ip = socket.local_addr()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "No valid local IP address found",
        ));
    }
    Ok(ip)
}
