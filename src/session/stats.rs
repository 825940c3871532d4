//! Per-session statistics.

/// Session statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Peer identity
    pub peer_identity: String,
    /// Negotiated method name
    pub method: String,
    /// Commands decoded from the peer
    pub commands_received: u64,
    /// Commands written to the peer
    pub commands_sent: u64,
    /// Commands handed to the handler (inbound and synthetic)
    pub commands_dispatched: u64,
    /// Synthetic commands dispatched
    pub synthesized: u64,
    /// Raw bytes read
    pub bytes_in: u64,
    /// Raw bytes written
    pub bytes_out: u64,
    /// Frames that failed to decode
    pub malformed: u64,
    /// Keep-alives received
    pub keepalives_received: u64,
    /// Keep-alives sent
    pub keepalives_sent: u64,
    /// Session uptime in seconds
    pub uptime_secs: u64,
}

impl SessionStats {
    /// Ratio of malformed frames to all frames seen
    pub fn malformed_ratio(&self) -> f64 {
        let total = self.commands_received + self.malformed;
        if total == 0 {
            0.0
        } else {
            self.malformed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_ratio() {
        let mut stats = SessionStats::default();
        assert_eq!(stats.malformed_ratio(), 0.0);

        stats.commands_received = 3;
        stats.malformed = 1;
        assert!((stats.malformed_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = SessionStats {
            session_id: "abc".to_string(),
            bytes_in: 12,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["bytes_in"], 12);
    }
}
