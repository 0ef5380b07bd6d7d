//! Plain WebRTC value types shared by the wrappers, plus their native encodings.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::marshal::{NativeString, OptionalRaw};
use crate::native::{DataChannelInitRaw, OfferOptionsRaw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    #[serde(rename = "pranswer")]
    PrAnswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Offer),
            1 => Some(Self::PrAnswer),
            2 => Some(Self::Answer),
            3 => Some(Self::Rollback),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Offer => 0,
            Self::PrAnswer => 1,
            Self::Answer => 2,
            Self::Rollback => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    /// `None` when the native side reports a negative index.
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    pub(crate) fn mline_from_raw(index: i32) -> Option<u32> {
        u32::try_from(index).ok()
    }

    pub(crate) fn mline_to_raw(&self) -> i32 {
        self.sdp_mline_index
            .and_then(|i| i32::try_from(i).ok())
            .unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Unknown codes map to `Failed`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::New,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            5 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::New,
            1 => Self::Checking,
            2 => Self::Connected,
            3 => Self::Completed,
            5 => Self::Disconnected,
            6 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

impl DataChannelState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn code(self) -> i32 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }
}

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    #[default]
    Balanced,
    MaxCompat,
    MaxBundle,
}

/// Peer connection configuration, handed to the engine as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub ice_transport_policy: IceTransportPolicy,
    #[serde(default)]
    pub bundle_policy: BundlePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub ice_restart: bool,
    pub voice_activity_detection: bool,
}

impl OfferOptions {
    pub(crate) fn to_raw(self) -> OfferOptionsRaw {
        OfferOptionsRaw {
            ice_restart: self.ice_restart as u8,
            voice_activity_detection: self.voice_activity_detection as u8,
        }
    }
}

/// Data channel creation parameters. Unset fields take the engine's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: String,
    /// Pre-negotiated stream id; the channel is not announced in-band.
    pub negotiated_id: Option<u16>,
}

impl DataChannelInit {
    /// Native encoding. The returned string backs `protocol` and must outlive
    /// the raw struct.
    pub(crate) fn to_raw(&self) -> Result<(DataChannelInitRaw, NativeString)> {
        let protocol = NativeString::new(&self.protocol)?;
        let raw = DataChannelInitRaw {
            ordered: self.ordered.map(u8::from).into(),
            max_packet_life_time: self.max_packet_life_time.map(i32::from).into(),
            max_retransmits: self.max_retransmits.map(i32::from).into(),
            negotiated_id: self.negotiated_id.map(i32::from).into(),
            protocol: protocol.as_ptr(),
        };
        Ok((raw, protocol))
    }
}

/// One message received on a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelMessage {
    pub data: Vec<u8>,
    pub binary: bool,
}

impl DataChannelMessage {
    /// The payload as text, for non-binary messages holding valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        if self.binary {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }
}

pub(crate) fn optional_u8(raw: OptionalRaw<u8>) -> Option<bool> {
    raw.get().map(|v| v != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdp_type_codes() {
        for t in [SdpType::Offer, SdpType::PrAnswer, SdpType::Answer, SdpType::Rollback] {
            assert_eq!(SdpType::from_code(t.code()), Some(t));
        }
        assert_eq!(SdpType::from_code(9), None);
    }

    #[test]
    fn test_session_description_json() {
        let desc = SessionDescription::new(SdpType::PrAnswer, "v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pranswer", "sdp": "v=0"}));
    }

    #[test]
    fn test_configuration_json_is_camel_case() {
        let config = RtcConfiguration {
            ice_servers: vec![IceServer::new("stun:stun.example.org:3478")],
            ice_transport_policy: IceTransportPolicy::Relay,
            bundle_policy: BundlePolicy::MaxBundle,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "iceServers": [{"urls": ["stun:stun.example.org:3478"]}],
                "iceTransportPolicy": "relay",
                "bundlePolicy": "max-bundle"
            })
        );
    }

    #[test]
    fn test_mline_index_mapping() {
        assert_eq!(IceCandidate::mline_from_raw(-1), None);
        assert_eq!(IceCandidate::mline_from_raw(2), Some(2));

        let candidate = IceCandidate {
            candidate: "candidate:1".into(),
            sdp_mid: "0".into(),
            sdp_mline_index: None,
        };
        assert_eq!(candidate.mline_to_raw(), -1);
    }

    #[test]
    fn test_data_channel_init_raw() {
        let init = DataChannelInit {
            ordered: Some(false),
            max_retransmits: Some(3),
            protocol: "chat".into(),
            ..DataChannelInit::default()
        };
        let (raw, protocol) = init.to_raw().unwrap();
        assert_eq!(optional_u8(raw.ordered), Some(false));
        assert_eq!(Option::<i32>::from(raw.max_retransmits), Some(3));
        assert_eq!(Option::<i32>::from(raw.max_packet_life_time), None);
        assert_eq!(raw.protocol, protocol.as_ptr());
        assert_eq!(protocol.as_c_str().to_str().unwrap(), "chat");
    }

    #[test]
    fn test_message_text() {
        let text = DataChannelMessage {
            data: b"hi".to_vec(),
            binary: false,
        };
        assert_eq!(text.text(), Some("hi"));
        let binary = DataChannelMessage {
            data: b"hi".to_vec(),
            binary: true,
        };
        assert_eq!(binary.text(), None);
    }
}
