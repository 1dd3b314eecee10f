//! Connection options
//!
//! Timeouts and handshake settings applied by
//! [`Connection::connect`](crate::Connection::connect).

use std::time::Duration;

/// Options for opening a connection.
///
/// A zero timeout means "no deadline".
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Deadline for each receive (and the read phase of each `do_command`)
    pub read_timeout: Duration,

    /// Deadline for each send, flush and the write phase of `do_command`
    pub write_timeout: Duration,

    /// ACL user sent with AUTH; only used when a password is set
    pub username: Option<String>,

    /// Password sent with AUTH during the handshake
    pub password: Option<String>,

    /// Name registered with CLIENT SETNAME during the handshake
    pub client_name: Option<String>,

    /// Logical database selected with SELECT; 0 skips the command
    pub database: i64,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn database(mut self, db: i64) -> Self {
        self.database = db;
        self
    }
}

/// Converts a configured duration into an optional deadline.
pub(crate) fn deadline(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_deadlines() {
        let options = ConnectOptions::default();
        assert_eq!(deadline(options.read_timeout), None);
        assert_eq!(deadline(options.write_timeout), None);
        assert!(options.password.is_none());
        assert_eq!(options.database, 0);
    }

    #[test]
    fn test_builder() {
        let options = ConnectOptions::new()
            .read_timeout(Duration::from_millis(250))
            .username("app")
            .password("secret")
            .client_name("worker-1")
            .database(3);
        assert_eq!(deadline(options.read_timeout), Some(Duration::from_millis(250)));
        assert_eq!(options.username.as_deref(), Some("app"));
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.client_name.as_deref(), Some("worker-1"));
        assert_eq!(options.database, 3);
    }
}
