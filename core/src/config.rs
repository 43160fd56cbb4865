/// Configuration management
use crate::error::{Result, SyncError};
use crate::messenger_types::{ConversationRequest, Participant, SenderRole};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_PORT: u16 = 17082;

/// Engine and binary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Poll period while the feed is degraded or lost
    pub fallback_poll_interval: Duration,

    /// Poll period of the always-on safety net
    pub safety_poll_interval: Duration,

    /// Max distance between a provisional timestamp and its confirmed row
    pub optimistic_match_window: Duration,

    /// Capacity of the view event broadcast channel
    pub event_buffer: usize,

    /// Directory holding the sled database
    pub data_dir: PathBuf,

    /// Messenger API listen address
    pub api_addr: SocketAddr,

    /// Conversation opened by the binary
    pub conversation: ConversationRequest,

    /// Which side of the conversation the local user is
    pub role: SenderRole,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fallback_poll_interval: Duration::from_secs(3),
            safety_poll_interval: Duration::from_secs(5),
            optimistic_match_window: Duration::from_secs(60),
            event_buffer: 256,
            data_dir: PathBuf::from(".chatsync"),
            api_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_API_PORT)),
            conversation: ConversationRequest {
                quote_request_id: String::new(),
                client_id: String::new(),
                mover_id: String::new(),
            },
            role: SenderRole::Client,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 4 {
            return Err(SyncError::Config(format!(
                "Usage: {} <quote_request_id> <client_id> <mover_id> [--as client|mover] [--data-dir <path>] [--api-port <port>] [--fallback-ms <ms>] [--safety-ms <ms>]",
                args.first().map(String::as_str).unwrap_or("chatsync")
            )));
        }

        let conversation = ConversationRequest {
            quote_request_id: args[1].clone(),
            client_id: args[2].clone(),
            mover_id: args[3].clone(),
        };

        let mut config = Self {
            conversation,
            ..Default::default()
        };
        let mut api_port: Option<u16> = None;

        let mut i = 4;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = args
                .get(i + 1)
                .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))?;
            match flag {
                "--as" => config.role = parse_role(value)?,
                "--data-dir" => config.data_dir = PathBuf::from(value),
                "--api-port" => {
                    api_port = Some(value.parse::<u16>().map_err(|_| {
                        SyncError::Config("--api-port must be a valid number (0-65535)".to_string())
                    })?)
                }
                "--fallback-ms" => config.fallback_poll_interval = parse_millis(flag, value)?,
                "--safety-ms" => config.safety_poll_interval = parse_millis(flag, value)?,
                other => {
                    return Err(SyncError::Config(format!("Unknown argument: {}", other)));
                }
            }
            i += 2;
        }

        // Env overrides
        if let Some(p) = std::env::var("CHATSYNC_API_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            api_port = Some(p);
        }
        if let Ok(dir) = std::env::var("CHATSYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(port) = api_port {
            config.api_addr = SocketAddr::from(([127, 0, 0, 1], port));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the timers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fallback_poll_interval.is_zero() {
            return Err(SyncError::Config(
                "fallback_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.safety_poll_interval.is_zero() {
            return Err(SyncError::Config(
                "safety_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(SyncError::Config("event_buffer must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The local participant implied by `role`
    pub fn participant(&self) -> Participant {
        let user_id = match self.role {
            SenderRole::Client => self.conversation.client_id.clone(),
            SenderRole::Mover => self.conversation.mover_id.clone(),
        };
        Participant {
            user_id,
            role: self.role,
        }
    }
}

fn parse_role(value: &str) -> Result<SenderRole> {
    match value {
        "client" => Ok(SenderRole::Client),
        "mover" => Ok(SenderRole::Mover),
        other => Err(SyncError::Config(format!(
            "--as must be client or mover, got {}",
            other
        ))),
    }
}

fn parse_millis(flag: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| SyncError::Config(format!("{} must be a number of milliseconds", flag)))
}
