//! Shared utility helpers.

use crate::error::SqlcmdError;

/// Case-insensitive starts_with check without allocating.
#[inline]
pub fn starts_with_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

/// Split a server string of the form `[tcp:]server[[/instance]|[,port]]`.
///
/// Returns `(host, instance, port)` where a missing instance is empty and a
/// missing port is 0. Naming both a port and an instance is rejected.
pub fn split_server(server: &str) -> Result<(String, String, u16), SqlcmdError> {
    let mut server = server;
    if starts_with_ci(server, "tcp:") {
        if server.len() == 4 {
            return Err(SqlcmdError::InvalidServerName);
        }
        server = &server[4..];
    }

    if server.contains(',') {
        let parts: Vec<&str> = server.split(',').collect();
        if parts.len() != 2 || parts[0].contains('/') {
            return Err(SqlcmdError::InvalidServerName);
        }
        let port = parts[1]
            .trim()
            .parse::<u16>()
            .map_err(|_| SqlcmdError::InvalidServerName)?;
        return Ok((parts[0].to_string(), String::new(), port));
    }

    if server.contains('/') {
        let parts: Vec<&str> = server.split('/').collect();
        if parts.len() != 2 {
            return Err(SqlcmdError::InvalidServerName);
        }
        return Ok((parts[0].to_string(), parts[1].to_string(), 0));
    }

    Ok((server.to_string(), String::new(), 0))
}

/// Name of the local machine, empty when it cannot be determined.
pub fn local_hostname() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_default()
}

/// Login name of the user running the process, as used for trusted connections.
pub fn current_user_name() -> String {
    let user = ["USERNAME", "USER", "LOGNAME"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default();
    match std::env::var("USERDOMAIN") {
        Ok(domain) if !domain.is_empty() && !user.is_empty() => format!("{}\\{}", domain, user),
        _ => user,
    }
}
