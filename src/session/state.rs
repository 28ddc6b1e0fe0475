use std::fmt;

/// Lifecycle of a client mail session.
///
/// `AwaitingAttestation -> ExchangingMail -> Declaring -> Closed`, with a
/// direct edge to `Closed` from every state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingAttestation,
    ExchangingMail,
    Declaring,
    Closed,
}

impl SessionState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::AwaitingAttestation => "AWAITING_ATTESTATION",
            Self::ExchangingMail => "EXCHANGING_MAIL",
            Self::Declaring => "DECLARING",
            Self::Closed => "CLOSED",
        }
    }

    pub const fn can_send(self) -> bool {
        matches!(self, Self::ExchangingMail)
    }

    pub const fn can_receive(self) -> bool {
        matches!(self, Self::ExchangingMail | Self::Declaring)
    }

    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
