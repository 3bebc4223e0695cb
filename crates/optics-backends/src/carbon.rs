//! The carbon (Graphite) line-protocol backend: one
//! `<prefix>.<host>[.<source>].<key>[.<sub>] <value> <ts>\n` line per metric
//! over a plain TCP stream.

use optics_poller::{normalize, Backend, Poll};
use std::io::Write;
use std::net::TcpStream;

/// Connects (and reconnects) to a carbon line-receiver, throttled to at
/// most one reconnect attempt per poll timestamp so a down collector
/// cannot turn every poll into a fresh connect storm.
pub struct CarbonBackend {
    addr: String,
    stream: Option<TcpStream>,
    last_reconnect_attempt: Option<u64>,
}

impl CarbonBackend {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), stream: None, last_reconnect_attempt: None }
    }

    fn ensure_connected(&mut self, ts: u64) {
        if self.stream.is_some() {
            return;
        }
        if self.last_reconnect_attempt == Some(ts) {
            return;
        }
        self.last_reconnect_attempt = Some(ts);
        match TcpStream::connect(&self.addr) {
            Ok(stream) => self.stream = Some(stream),
            Err(err) => tracing::warn!(addr = %self.addr, error = %err, "carbon backend failed to connect"),
        }
    }

    fn send_line(&mut self, line: &str) {
        let Some(stream) = self.stream.as_mut() else { return };
        if let Err(err) = stream.write_all(line.as_bytes()) {
            tracing::warn!(addr = %self.addr, error = %err, "carbon backend write failed, dropping connection");
            self.stream = None;
        }
    }
}

/// Strips `poll.key`'s leading `prefix[.source]` segment, leaving the
/// lens's own name (with no further sub-key, since `poll.key` is always
/// the base key before `normalize` appends one).
fn lens_name(poll: &Poll<'_>) -> &str {
    let mut rest = poll.key;
    if !poll.prefix.is_empty() {
        if let Some(stripped) = rest.strip_prefix(poll.prefix) {
            rest = stripped.strip_prefix('.').unwrap_or(stripped);
        }
    }
    if !poll.source.is_empty() {
        if let Some(stripped) = rest.strip_prefix(poll.source) {
            rest = stripped.strip_prefix('.').unwrap_or(stripped);
        }
    }
    rest
}

fn carbon_key(poll: &Poll<'_>, full_key: &str) -> String {
    let sub = full_key.strip_prefix(poll.key).unwrap_or("").trim_start_matches('.');
    let mut out = String::new();
    if !poll.prefix.is_empty() {
        out.push_str(poll.prefix);
        out.push('.');
    }
    out.push_str(poll.host);
    if !poll.source.is_empty() {
        out.push('.');
        out.push_str(poll.source);
    }
    out.push('.');
    out.push_str(lens_name(poll));
    if !sub.is_empty() {
        out.push('.');
        out.push_str(sub);
    }
    out
}

impl Backend for CarbonBackend {
    fn poll(&mut self, poll: &Poll<'_>) {
        self.ensure_connected(poll.ts);
        let mut lines = Vec::new();
        normalize(poll, |ts, full_key, value| {
            lines.push(format!("{} {value} {ts}\n", carbon_key(poll, full_key)));
            true
        });
        for line in lines {
            self.send_line(&line);
        }
    }
}
