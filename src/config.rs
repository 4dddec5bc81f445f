use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind both transports to
    pub bind_address: IpAddr,
    /// Port of the ordered (TCP) channel
    pub tcp_port: u16,
    /// Port of the best-effort (UDP) channel
    pub udp_port: u16,
    /// Port of the metrics endpoint
    pub metrics_port: u16,
    /// Number of game rooms created at startup
    pub game_rooms: usize,
    /// Maximum players per room
    pub max_players_per_room: usize,
    /// Kills needed to trigger game over
    pub frags_to_win: u32,
    /// Interval of the batched move flush
    pub moves_update_frequency_ms: u64,
    /// Interval of the pending-ack resend sweep
    pub resend_interval_ms: u64,
    /// How long a processed inbound event is remembered for dedup
    pub processed_event_ttl_ms: u64,
    /// Worst round-trip the dedup window has to cover
    pub max_expected_rtt_ms: u64,
    /// Ordered channel is closed after this long without a frame
    pub reader_idle_timeout_ms: u64,
    /// Player is disconnected after this long without moving or attacking
    pub idle_player_timeout_ms: u64,
    /// Kill/death snapshots are kept this long after a disconnect
    pub player_recovery_timeout_ms: u64,
    /// Distance within which other players' moves are sent
    pub visibility_radius: f32,
    /// Number of tasks receiving datagrams
    pub udp_workers: usize,
    /// Delay before a merged connection is handed to the primary channel's context
    pub merge_connection_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            tcp_port: 7777,
            udp_port: 7778,
            metrics_port: 9090,
            game_rooms: 10,
            max_players_per_room: 25,
            frags_to_win: 25,
            moves_update_frequency_ms: 50,
            resend_interval_ms: 100,
            processed_event_ttl_ms: 10_000,
            max_expected_rtt_ms: 2_000,
            reader_idle_timeout_ms: 30_000,
            idle_player_timeout_ms: 120_000,
            player_recovery_timeout_ms: 120_000,
            visibility_radius: 20.0,
            udp_workers: 4,
            merge_connection_delay_ms: 50,
        }
    }
}

/// Parse an env var, keeping the current value when missing or out of range
fn env_override<T>(name: &str, current: &mut T, accept: impl Fn(&T) -> bool)
where
    T: std::str::FromStr,
{
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) if accept(&parsed) => *current = parsed,
        Ok(_) => tracing::warn!("{} '{}' out of range, using default", name, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("BIND_ADDRESS", &mut config.bind_address, |_| true);
        env_override("TCP_PORT", &mut config.tcp_port, |p| *p > 0);
        env_override("UDP_PORT", &mut config.udp_port, |p| *p > 0);
        env_override("METRICS_PORT", &mut config.metrics_port, |p| *p > 0);
        env_override("GAME_ROOMS", &mut config.game_rooms, |n| (1..=1000).contains(n));
        env_override("MAX_PLAYERS_PER_ROOM", &mut config.max_players_per_room, |n| {
            (1..=1000).contains(n)
        });
        env_override("FRAGS_TO_WIN", &mut config.frags_to_win, |n| *n > 0);
        env_override(
            "MOVES_UPDATE_FREQUENCY_MS",
            &mut config.moves_update_frequency_ms,
            |ms| *ms > 0,
        );
        env_override("RESEND_INTERVAL_MS", &mut config.resend_interval_ms, |ms| *ms > 0);
        env_override("PROCESSED_EVENT_TTL_MS", &mut config.processed_event_ttl_ms, |ms| *ms > 0);
        env_override("MAX_EXPECTED_RTT_MS", &mut config.max_expected_rtt_ms, |_| true);
        env_override("READER_IDLE_TIMEOUT_MS", &mut config.reader_idle_timeout_ms, |ms| *ms > 0);
        env_override("IDLE_PLAYER_TIMEOUT_MS", &mut config.idle_player_timeout_ms, |ms| *ms > 0);
        env_override(
            "PLAYER_RECOVERY_TIMEOUT_MS",
            &mut config.player_recovery_timeout_ms,
            |_| true,
        );
        env_override("VISIBILITY_RADIUS", &mut config.visibility_radius, |r| {
            r.is_finite() && *r > 0.0
        });
        env_override("UDP_WORKERS", &mut config.udp_workers, |n| (1..=64).contains(n));
        env_override(
            "MERGE_CONNECTION_DELAY_MS",
            &mut config.merge_connection_delay_ms,
            |_| true,
        );

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tcp_port == 0 || self.udp_port == 0 {
            return Err("Ports cannot be 0".to_string());
        }
        if self.metrics_port == self.tcp_port {
            return Err("Metrics port collides with game ports".to_string());
        }
        if self.game_rooms == 0 {
            return Err("game_rooms must be at least 1".to_string());
        }
        if self.max_players_per_room == 0 {
            return Err("max_players_per_room must be at least 1".to_string());
        }
        if self.frags_to_win == 0 {
            return Err("frags_to_win must be at least 1".to_string());
        }
        // A shorter window lets a late duplicate be applied a second time
        if self.processed_event_ttl_ms <= self.max_expected_rtt_ms + self.resend_interval_ms {
            return Err(format!(
                "processed_event_ttl_ms ({}) must exceed max_expected_rtt_ms + resend_interval_ms ({})",
                self.processed_event_ttl_ms,
                self.max_expected_rtt_ms + self.resend_interval_ms
            ));
        }
        if self.udp_workers == 0 {
            return Err("udp_workers must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.moves_update_frequency_ms)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn processed_event_ttl(&self) -> Duration {
        Duration::from_millis(self.processed_event_ttl_ms)
    }

    pub fn reader_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_idle_timeout_ms)
    }

    pub fn idle_player_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_player_timeout_ms)
    }

    pub fn player_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.player_recovery_timeout_ms)
    }

    pub fn merge_connection_delay(&self) -> Duration {
        Duration::from_millis(self.merge_connection_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_port, 7777);
        assert_eq!(config.max_players_per_room, 25);
        assert_eq!(config.frags_to_win, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.tcp_port > 0);
        assert!(config.udp_port > 0);
    }

    #[test]
    fn test_dedup_window_must_cover_rtt() {
        let config = ServerConfig {
            processed_event_ttl_ms: 1_000,
            max_expected_rtt_ms: 1_000,
            resend_interval_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rooms_rejected() {
        let config = ServerConfig {
            game_rooms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.resend_interval(), Duration::from_millis(100));
    }
}
