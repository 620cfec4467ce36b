//! Operator-facing output.

/// Receives events an operator must see.
///
/// The registration password is the only secret the server ever displays;
/// it reaches the operator through this trait and nowhere else.
pub trait OperatorConsole: Send + Sync {
    /// Shows the one-time password for a pending registration.
    fn registration_password(&self, host: &str, password: &str);

    /// Reports a host whose key was just trusted.
    fn host_registered(&self, host: &str, fingerprint: &str) {
        let _ = (host, fingerprint);
    }

    /// Reports a session that identified itself.
    fn host_connected(&self, host: &str, fingerprint: Option<&str>) {
        let _ = (host, fingerprint);
    }
}

/// Console that writes to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl OperatorConsole for TracingConsole {
    fn registration_password(&self, host: &str, password: &str) {
        tracing::warn!(
            target: "trustsync::console",
            host,
            "registration password for {host}: {password}"
        );
    }

    fn host_registered(&self, host: &str, fingerprint: &str) {
        tracing::info!(target: "trustsync::console", host, fingerprint, "host registered");
    }

    fn host_connected(&self, host: &str, fingerprint: Option<&str>) {
        match fingerprint {
            Some(fingerprint) => {
                tracing::info!(target: "trustsync::console", host, fingerprint, "trusted host connected")
            }
            None => tracing::info!(target: "trustsync::console", host, "unknown host connected"),
        }
    }
}
