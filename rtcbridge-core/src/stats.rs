//! Statistics reports delivered by the engine as JSON.
//!
//! Each entry is one variant of the closed [`RtcStats`] enum, keyed by its
//! `type` field. Entries of kinds this crate does not model (vendor
//! extensions) are skipped, as are malformed entries of known kinds; one bad
//! entry never discards the rest of the report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, NativeErrorKind, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodecStats {
    pub id: String,
    pub timestamp: f64,
    pub payload_type: Option<u32>,
    pub mime_type: String,
    pub clock_rate: Option<u32>,
    pub channels: Option<u32>,
    pub sdp_fmtp_line: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InboundRtpStats {
    pub id: String,
    pub timestamp: f64,
    pub ssrc: u32,
    pub kind: String,
    pub codec_id: Option<String>,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_lost: i64,
    pub jitter: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboundRtpStats {
    pub id: String,
    pub timestamp: f64,
    pub ssrc: u32,
    pub kind: String,
    pub codec_id: Option<String>,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub target_bitrate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteInboundRtpStats {
    pub id: String,
    pub timestamp: f64,
    pub ssrc: u32,
    pub kind: String,
    pub packets_lost: i64,
    pub fraction_lost: Option<f64>,
    pub round_trip_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteOutboundRtpStats {
    pub id: String,
    pub timestamp: f64,
    pub ssrc: u32,
    pub kind: String,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub remote_timestamp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaSourceStats {
    pub id: String,
    pub timestamp: f64,
    pub track_identifier: String,
    pub kind: String,
    pub audio_level: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frames_per_second: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerConnectionStats {
    pub id: String,
    pub timestamp: f64,
    pub data_channels_opened: u32,
    pub data_channels_closed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataChannelStats {
    pub id: String,
    pub timestamp: f64,
    pub label: String,
    pub protocol: String,
    pub data_channel_identifier: Option<u16>,
    pub state: String,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportStats {
    pub id: String,
    pub timestamp: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub dtls_state: String,
    pub selected_candidate_pair_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidatePairStats {
    pub id: String,
    pub timestamp: f64,
    pub transport_id: String,
    pub local_candidate_id: String,
    pub remote_candidate_id: String,
    pub state: String,
    pub nominated: bool,
    pub current_round_trip_time: Option<f64>,
    pub available_outgoing_bitrate: Option<f64>,
}

/// Shared by local and remote candidate entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IceCandidateStats {
    pub id: String,
    pub timestamp: f64,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub protocol: String,
    pub candidate_type: String,
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CertificateStats {
    pub id: String,
    pub timestamp: f64,
    pub fingerprint: String,
    pub fingerprint_algorithm: String,
    pub base64_certificate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStats {
    Codec(CodecStats),
    InboundRtp(InboundRtpStats),
    OutboundRtp(OutboundRtpStats),
    RemoteInboundRtp(RemoteInboundRtpStats),
    RemoteOutboundRtp(RemoteOutboundRtpStats),
    MediaSource(MediaSourceStats),
    PeerConnection(PeerConnectionStats),
    DataChannel(DataChannelStats),
    Transport(TransportStats),
    CandidatePair(CandidatePairStats),
    LocalCandidate(IceCandidateStats),
    RemoteCandidate(IceCandidateStats),
    Certificate(CertificateStats),
}

const KNOWN_KINDS: &[&str] = &[
    "codec",
    "inbound-rtp",
    "outbound-rtp",
    "remote-inbound-rtp",
    "remote-outbound-rtp",
    "media-source",
    "peer-connection",
    "data-channel",
    "transport",
    "candidate-pair",
    "local-candidate",
    "remote-candidate",
    "certificate",
];

impl RtcStats {
    /// The `type` tag this entry was parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Codec(_) => "codec",
            Self::InboundRtp(_) => "inbound-rtp",
            Self::OutboundRtp(_) => "outbound-rtp",
            Self::RemoteInboundRtp(_) => "remote-inbound-rtp",
            Self::RemoteOutboundRtp(_) => "remote-outbound-rtp",
            Self::MediaSource(_) => "media-source",
            Self::PeerConnection(_) => "peer-connection",
            Self::DataChannel(_) => "data-channel",
            Self::Transport(_) => "transport",
            Self::CandidatePair(_) => "candidate-pair",
            Self::LocalCandidate(_) => "local-candidate",
            Self::RemoteCandidate(_) => "remote-candidate",
            Self::Certificate(_) => "certificate",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Codec(s) => &s.id,
            Self::InboundRtp(s) => &s.id,
            Self::OutboundRtp(s) => &s.id,
            Self::RemoteInboundRtp(s) => &s.id,
            Self::RemoteOutboundRtp(s) => &s.id,
            Self::MediaSource(s) => &s.id,
            Self::PeerConnection(s) => &s.id,
            Self::DataChannel(s) => &s.id,
            Self::Transport(s) => &s.id,
            Self::CandidatePair(s) => &s.id,
            Self::LocalCandidate(s) | Self::RemoteCandidate(s) => &s.id,
            Self::Certificate(s) => &s.id,
        }
    }
}

/// One `get_stats` result.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    entries: Vec<RtcStats>,
    received_at: DateTime<Utc>,
}

impl StatsReport {
    /// Parse the engine's JSON array of stats entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| BridgeError::native(NativeErrorKind::SyntaxError, format!("stats report: {e}")))?;

        let mut entries = Vec::with_capacity(raw.len());
        for value in raw {
            let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default().to_string();
            if !KNOWN_KINDS.contains(&kind.as_str()) {
                tracing::debug!(kind = %kind, "skipping unsupported stats entry");
                continue;
            }
            match serde_json::from_value::<RtcStats>(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(kind = %kind, "skipping malformed stats entry: {e}"),
            }
        }
        Ok(Self {
            entries,
            received_at: Utc::now(),
        })
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RtcStats> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&RtcStats> {
        self.entries.iter().find(|s| s.id() == id)
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a RtcStats> + 'a {
        self.entries.iter().filter(move |s| s.kind() == kind)
    }

    pub fn codecs(&self) -> impl Iterator<Item = &CodecStats> {
        self.entries.iter().filter_map(|s| match s {
            RtcStats::Codec(c) => Some(c),
            _ => None,
        })
    }

    pub fn inbound_rtp(&self) -> impl Iterator<Item = &InboundRtpStats> {
        self.entries.iter().filter_map(|s| match s {
            RtcStats::InboundRtp(c) => Some(c),
            _ => None,
        })
    }

    pub fn outbound_rtp(&self) -> impl Iterator<Item = &OutboundRtpStats> {
        self.entries.iter().filter_map(|s| match s {
            RtcStats::OutboundRtp(c) => Some(c),
            _ => None,
        })
    }

    pub fn data_channels(&self) -> impl Iterator<Item = &DataChannelStats> {
        self.entries.iter().filter_map(|s| match s {
            RtcStats::DataChannel(c) => Some(c),
            _ => None,
        })
    }

    pub fn transports(&self) -> impl Iterator<Item = &TransportStats> {
        self.entries.iter().filter_map(|s| match s {
            RtcStats::Transport(c) => Some(c),
            _ => None,
        })
    }

    /// The nominated candidate pair, if the report carries one.
    pub fn selected_candidate_pair(&self) -> Option<&CandidatePairStats> {
        self.entries.iter().find_map(|s| match s {
            RtcStats::CandidatePair(c) if c.nominated => Some(c),
            _ => None,
        })
    }

    pub fn peer_connection(&self) -> Option<&PeerConnectionStats> {
        self.entries.iter().find_map(|s| match s {
            RtcStats::PeerConnection(c) => Some(c),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"type": "codec", "id": "C1", "timestamp": 1.0, "payloadType": 111,
         "mimeType": "audio/opus", "clockRate": 48000, "channels": 2,
         "sdpFmtpLine": "minptime=10;useinbandfec=1"},
        {"type": "outbound-rtp", "id": "O1", "timestamp": 1.0, "ssrc": 1234,
         "kind": "audio", "codecId": "C1", "packetsSent": 50, "bytesSent": 6400},
        {"type": "candidate-pair", "id": "CP1", "timestamp": 1.0, "transportId": "T0",
         "localCandidateId": "L0", "remoteCandidateId": "R0", "state": "succeeded",
         "nominated": true, "currentRoundTripTime": 0.02},
        {"type": "x-vendor-thing", "id": "V1", "timestamp": 1.0},
        {"type": "inbound-rtp", "id": "I1", "ssrc": "not-a-number"},
        {"type": "remote-candidate", "id": "R0", "address": "192.0.2.1", "port": 3478,
         "protocol": "udp", "candidateType": "srflx"}
    ]"#;

    #[test]
    fn test_parse_known_kinds() {
        let report = StatsReport::from_json(SAMPLE).unwrap();
        assert_eq!(report.len(), 4);

        let codec = report.codecs().next().unwrap();
        assert_eq!(codec.mime_type, "audio/opus");
        assert_eq!(codec.clock_rate, Some(48000));

        let outbound = report.outbound_rtp().next().unwrap();
        assert_eq!(outbound.bytes_sent, 6400);
        assert_eq!(outbound.codec_id.as_deref(), Some("C1"));

        let pair = report.selected_candidate_pair().unwrap();
        assert_eq!(pair.current_round_trip_time, Some(0.02));

        match report.get("R0") {
            Some(RtcStats::RemoteCandidate(c)) => assert_eq!(c.port, Some(3478)),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_malformed_entries_are_skipped() {
        let report = StatsReport::from_json(SAMPLE).unwrap();
        assert!(report.get("V1").is_none());
        assert!(report.get("I1").is_none());
        assert_eq!(report.inbound_rtp().count(), 0);
    }

    #[test]
    fn test_kind_matches_tag() {
        let report = StatsReport::from_json(SAMPLE).unwrap();
        for entry in report.iter() {
            let json = serde_json::to_value(entry).unwrap();
            assert_eq!(json["type"], entry.kind());
        }
        assert_eq!(report.of_kind("codec").count(), 1);
    }

    #[test]
    fn test_not_an_array() {
        let err = StatsReport::from_json("{\"type\": \"codec\"}").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Native {
                kind: NativeErrorKind::SyntaxError,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_report() {
        let report = StatsReport::from_json("[]").unwrap();
        assert!(report.is_empty());
        assert!(report.received_at() <= Utc::now());
    }
}
