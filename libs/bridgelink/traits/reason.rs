use std::fmt;

/// Relay close codes reserved for application-level rejections
pub mod close_code {
    /// There is no active group with a matching ID
    pub const NO_MATCHING_GROUP: u16 = 4000;
    /// The client's group is at capacity
    pub const GROUP_AT_CAPACITY: u16 = 4001;
    /// The account couldn't be validated
    pub const ACCOUNT_VALIDATION_FAILED: u16 = 4002;
    /// The installation token is out of date; the device must be re-linked
    pub const STALE_INSTALLATION_TOKEN: u16 = 4003;
    /// The user does not have an active subscription
    pub const NO_ACTIVE_SUBSCRIPTION: u16 = 4004;
    /// The account logged in from another location
    pub const LOGGED_IN_ELSEWHERE: u16 = 4005;

    pub(crate) const NORMAL: u16 = 1000;
    pub(crate) const PROTOCOL_ERROR: u16 = 1002;
    pub(crate) const ABNORMAL: u16 = 1006;
    pub(crate) const POLICY_VIOLATION: u16 = 1008;
}

/// Reason a connection closed, surfaced to the host on every close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Generic network or socket fault
    ConnectivityFailure,
    /// Malformed frame or oversized declared length
    ProtocolError,
    /// Credential rejected, or no account signed in
    Unauthorized,
    /// The server rejected this protocol version
    ClientOutdated,
    /// Local fault such as a failed credential fetch
    InternalError,
    NoMatchingGroup,
    GroupAtCapacity,
    AccountValidationFailed,
    StaleInstallationToken,
    NoActiveSubscription,
    LoggedInElsewhere,
    /// Unrecognized relay close code
    ExternalError,
    /// Locally requested stop (disconnect or shutdown)
    Requested,
    /// Attempt replaced by a newer launch token; never reported to the host
    Superseded,
}

impl CloseReason {
    /// Translate a relay WebSocket close code into the local taxonomy
    pub fn from_relay_close_code(code: u16) -> Self {
        match code {
            close_code::NORMAL | close_code::ABNORMAL => CloseReason::ConnectivityFailure,
            close_code::PROTOCOL_ERROR => CloseReason::ProtocolError,
            close_code::POLICY_VIOLATION => CloseReason::ClientOutdated,
            close_code::NO_MATCHING_GROUP => CloseReason::NoMatchingGroup,
            close_code::GROUP_AT_CAPACITY => CloseReason::GroupAtCapacity,
            close_code::ACCOUNT_VALIDATION_FAILED => CloseReason::AccountValidationFailed,
            close_code::STALE_INSTALLATION_TOKEN => CloseReason::StaleInstallationToken,
            close_code::NO_ACTIVE_SUBSCRIPTION => CloseReason::NoActiveSubscription,
            close_code::LOGGED_IN_ELSEWHERE => CloseReason::LoggedInElsewhere,
            _ => CloseReason::ExternalError,
        }
    }

    /// Whether the host should prompt the user to act
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            CloseReason::Unauthorized
                | CloseReason::AccountValidationFailed
                | CloseReason::NoActiveSubscription
                | CloseReason::StaleInstallationToken
                | CloseReason::ClientOutdated
        )
    }

    /// Whether the host should report this close silently
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            CloseReason::ConnectivityFailure | CloseReason::Requested | CloseReason::Superseded
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::ConnectivityFailure => "connection failed",
            CloseReason::ProtocolError => "protocol error",
            CloseReason::Unauthorized => "unauthorized",
            CloseReason::ClientOutdated => "client outdated",
            CloseReason::InternalError => "internal error",
            CloseReason::NoMatchingGroup => "no matching group",
            CloseReason::GroupAtCapacity => "group at capacity",
            CloseReason::AccountValidationFailed => "account validation failed",
            CloseReason::StaleInstallationToken => "stale installation token",
            CloseReason::NoActiveSubscription => "no active subscription",
            CloseReason::LoggedInElsewhere => "logged in elsewhere",
            CloseReason::ExternalError => "external error",
            CloseReason::Requested => "disconnect requested",
            CloseReason::Superseded => "superseded",
        };
        f.write_str(text)
    }
}
