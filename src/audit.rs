/// Security audit trail
///
/// Authentication outcomes are emitted as structured tracing events with a
/// stable `event` field so they can be counted downstream. Events carry
/// usernames and client addresses only; secrets and token values never reach
/// this module.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent<'a> {
    LoginSucceeded {
        username: &'a str,
        address: &'a str,
    },
    LoginFailed {
        username: &'a str,
        address: &'a str,
        remaining_attempts: u32,
    },
    LoginLocked {
        username: &'a str,
        address: &'a str,
        retry_after_seconds: i64,
    },
    Registered {
        username: &'a str,
        address: &'a str,
    },
    RegistrationRejected {
        address: &'a str,
        reason: &'a str,
    },
    RegistrationLocked {
        address: &'a str,
        retry_after_seconds: i64,
    },
    RefreshRotated {
        username: &'a str,
    },
    /// A revoked or rotated-away refresh token was presented again
    RefreshReuse {
        username: &'a str,
    },
    LoggedOut {
        username: Option<&'a str>,
    },
    LoggedOutEverywhere {
        username: &'a str,
        revoked: u64,
    },
    Purged {
        refresh_records: u64,
        attempt_counters: usize,
    },
}

impl AuthEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::LoginSucceeded { .. } => "login_succeeded",
            AuthEvent::LoginFailed { .. } => "login_failed",
            AuthEvent::LoginLocked { .. } => "login_locked",
            AuthEvent::Registered { .. } => "registered",
            AuthEvent::RegistrationRejected { .. } => "registration_rejected",
            AuthEvent::RegistrationLocked { .. } => "registration_locked",
            AuthEvent::RefreshRotated { .. } => "refresh_rotated",
            AuthEvent::RefreshReuse { .. } => "refresh_reuse",
            AuthEvent::LoggedOut { .. } => "logged_out",
            AuthEvent::LoggedOutEverywhere { .. } => "logged_out_everywhere",
            AuthEvent::Purged { .. } => "purged",
        }
    }

    /// Failures and lockouts are worth a warning
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuthEvent::LoginFailed { .. }
                | AuthEvent::LoginLocked { .. }
                | AuthEvent::RegistrationRejected { .. }
                | AuthEvent::RegistrationLocked { .. }
                | AuthEvent::RefreshReuse { .. }
        )
    }
}

pub fn record(event: AuthEvent<'_>) {
    let name = event.name();
    match event {
        AuthEvent::LoginSucceeded { username, address }
        | AuthEvent::Registered { username, address } => {
            tracing::info!(event = name, username = %username, client_ip = %address, "Audit log entry");
        }
        AuthEvent::LoginFailed {
            username,
            address,
            remaining_attempts,
        } => {
            tracing::warn!(
                event = name,
                username = %username,
                client_ip = %address,
                remaining_attempts = remaining_attempts,
                "Audit log entry"
            );
        }
        AuthEvent::LoginLocked {
            username,
            address,
            retry_after_seconds,
        } => {
            tracing::warn!(
                event = name,
                username = %username,
                client_ip = %address,
                retry_after_seconds = retry_after_seconds,
                "Audit log entry"
            );
        }
        AuthEvent::RegistrationRejected { address, reason } => {
            tracing::warn!(event = name, client_ip = %address, reason = %reason, "Audit log entry");
        }
        AuthEvent::RegistrationLocked {
            address,
            retry_after_seconds,
        } => {
            tracing::warn!(
                event = name,
                client_ip = %address,
                retry_after_seconds = retry_after_seconds,
                "Audit log entry"
            );
        }
        AuthEvent::RefreshRotated { username } => {
            tracing::info!(event = name, username = %username, "Audit log entry");
        }
        AuthEvent::RefreshReuse { username } => {
            tracing::warn!(event = name, username = %username, "Audit log entry");
        }
        AuthEvent::LoggedOut { username } => {
            tracing::info!(event = name, username = ?username, "Audit log entry");
        }
        AuthEvent::LoggedOutEverywhere { username, revoked } => {
            tracing::info!(event = name, username = %username, revoked = revoked, "Audit log entry");
        }
        AuthEvent::Purged {
            refresh_records,
            attempt_counters,
        } => {
            tracing::info!(
                event = name,
                refresh_records = refresh_records,
                attempt_counters = attempt_counters,
                "Audit log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        let event = AuthEvent::LoginFailed {
            username: "alice",
            address: "10.0.0.1",
            remaining_attempts: 3,
        };

        assert_eq!(event.name(), "login_failed");
        assert!(event.is_failure());
    }

    #[test]
    fn test_success_events_are_not_failures() {
        let event = AuthEvent::LoginSucceeded {
            username: "alice",
            address: "10.0.0.1",
        };

        assert!(!event.is_failure());
        assert!(!AuthEvent::Purged {
            refresh_records: 0,
            attempt_counters: 0
        }
        .is_failure());
    }

    #[test]
    fn test_record_does_not_panic_without_subscriber() {
        record(AuthEvent::RefreshReuse { username: "alice" });
        record(AuthEvent::LoggedOut { username: None });
    }
}
