use super::connection::PeerId;
use super::protocol::NetworkMessage;

/// Handshake progress. The host walks `OfferCreated -> AnswerReceived ->
/// Connected`, the guest `AnswerCreated -> Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    OfferCreated,
    AnswerCreated,
    AnswerReceived,
    Connected,
    Failed,
}

impl SignalingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalingState::Idle => "idle",
            SignalingState::OfferCreated => "offer created",
            SignalingState::AnswerCreated => "answer created",
            SignalingState::AnswerReceived => "answer received",
            SignalingState::Connected => "connected",
            SignalingState::Failed => "connection failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Graceful,
    Timeout,
    Local,
    Error,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Graceful => "closed by peer",
            LeaveReason::Timeout => "timed out",
            LeaveReason::Local => "disconnected",
            LeaveReason::Error => "socket error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft {
        peer_id: PeerId,
        reason: LeaveReason,
    },
    MessageReceived {
        from: PeerId,
        message: NetworkMessage,
    },
    ConnectionStateChanged(SignalingState),
    ChatReceived {
        from: PeerId,
        sender: String,
        text: String,
    },
    DataChannelReady(PeerId),
}
