//! Pickup notifications.
//!
//! The upstream service announces a new wager by publishing `{"main_bot_game_id": ...}` on the
//! pickup channel. Delivery is at-least-once and every helper process hears every notice; the
//! store claim sorts out who gets the session, so duplicates are harmless.

use futures_util::StreamExt;
use mines_types::ExternalGameId;
use postgres::fallible_iterator::FallibleIterator;
use postgres::{Client, NoTls};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const PICKUP_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_CHANNEL_NAME_LEN: usize = 63;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PickupNotice {
    pub external_game_id: ExternalGameId,
}

#[derive(Debug, Error)]
pub enum PickupError {
    #[error("malformed pickup payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("pickup payload has an empty game id")]
    EmptyId,
    #[error("invalid channel name {0:?}")]
    InvalidChannel(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGameId {
    Text(String),
    Number(i64),
}

#[derive(Deserialize)]
struct PickupPayload {
    #[serde(alias = "external_game_id")]
    main_bot_game_id: RawGameId,
}

impl PickupNotice {
    pub fn parse(payload: &str) -> Result<Self, PickupError> {
        let payload: PickupPayload = serde_json::from_str(payload)?;
        let id = match payload.main_bot_game_id {
            RawGameId::Text(text) => text.trim().to_string(),
            RawGameId::Number(number) => number.to_string(),
        };
        if id.is_empty() {
            return Err(PickupError::EmptyId);
        }
        Ok(Self {
            external_game_id: ExternalGameId(id),
        })
    }
}

/// Parse and forward one raw payload. Returns false once the coordinator is gone.
async fn forward(payload: &str, tx: &mpsc::Sender<PickupNotice>) -> bool {
    match PickupNotice::parse(payload) {
        Ok(notice) => {
            debug!(external_game_id = %notice.external_game_id, "pickup notice");
            tx.send(notice).await.is_ok()
        }
        Err(err) => {
            warn!(%err, "skipping pickup payload");
            true
        }
    }
}

/// Channel names are interpolated into `LISTEN`, so only plain identifiers are accepted.
pub fn validate_channel(channel: &str) -> Result<(), PickupError> {
    let valid = !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_NAME_LEN
        && channel
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !channel.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(PickupError::InvalidChannel(channel.to_string()))
    }
}

/// Redis pub/sub subscriber. Reconnects forever until the coordinator stops listening.
pub struct RedisPickupSource {
    client: redis::Client,
    channel: String,
}

impl RedisPickupSource {
    pub fn new(url: &str, channel: String) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            channel,
        })
    }

    pub fn start(self, tx: mpsc::Sender<PickupNotice>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.run_subscriber(&tx).await {
                    Ok(()) if tx.is_closed() => break,
                    Ok(()) => warn!(channel = %self.channel, "pickup subscription ended"),
                    Err(err) => warn!(channel = %self.channel, %err, "pickup subscriber error"),
                }
                tokio::time::sleep(PICKUP_RECONNECT_DELAY).await;
            }
        })
    }

    async fn run_subscriber(&self, tx: &mpsc::Sender<PickupNotice>) -> redis::RedisResult<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "subscribed to pickup notices");
        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "pickup message decode failed");
                    continue;
                }
            };
            if !forward(&payload, tx).await {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Postgres `LISTEN` on a dedicated thread; the blocking client never touches the runtime.
pub struct PostgresPickupSource {
    url: String,
    channel: String,
}

impl PostgresPickupSource {
    pub fn new(url: String, channel: String) -> Result<Self, PickupError> {
        validate_channel(&channel)?;
        Ok(Self { url, channel })
    }

    pub fn start(self, tx: mpsc::Sender<PickupNotice>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || loop {
            match self.listen(&tx) {
                Ok(()) if tx.is_closed() => break,
                Ok(()) => warn!(channel = %self.channel, "pickup listener ended"),
                Err(err) => warn!(channel = %self.channel, %err, "pickup listener error"),
            }
            std::thread::sleep(PICKUP_RECONNECT_DELAY);
        })
    }

    fn listen(&self, tx: &mpsc::Sender<PickupNotice>) -> Result<(), postgres::Error> {
        let mut client = Client::connect(&self.url, NoTls)?;
        client.batch_execute(&format!("LISTEN {}", self.channel))?;
        info!(channel = %self.channel, "listening for pickup notices");
        let mut notifications = client.notifications();
        let mut iter = notifications.blocking_iter();
        while let Some(notification) = iter.next()? {
            match PickupNotice::parse(notification.payload()) {
                Ok(notice) => {
                    if tx.blocking_send(notice).is_err() {
                        return Ok(());
                    }
                }
                Err(err) => warn!(%err, "skipping pickup payload"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payloads() {
        let notice = PickupNotice::parse(r#"{"main_bot_game_id": "abc-1"}"#).unwrap();
        assert_eq!(notice.external_game_id, ExternalGameId::new("abc-1"));

        let notice = PickupNotice::parse(r#"{"main_bot_game_id": 981}"#).unwrap();
        assert_eq!(notice.external_game_id, ExternalGameId::new("981"));

        let notice = PickupNotice::parse(r#"{"external_game_id": "x"}"#).unwrap();
        assert_eq!(notice.external_game_id, ExternalGameId::new("x"));

        assert!(matches!(
            PickupNotice::parse(r#"{"main_bot_game_id": "  "}"#),
            Err(PickupError::EmptyId)
        ));
        assert!(matches!(
            PickupNotice::parse("not json"),
            Err(PickupError::Malformed(_))
        ));
        assert!(matches!(
            PickupNotice::parse(r#"{"game": 1}"#),
            Err(PickupError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_channel() {
        assert!(validate_channel("mines_session_pickup").is_ok());
        assert!(validate_channel("").is_err());
        assert!(validate_channel("1abc").is_err());
        assert!(validate_channel("pickup; DROP TABLE x").is_err());
        assert!(validate_channel(&"a".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn test_forward_skips_malformed() {
        let (tx, mut rx) = mpsc::channel(4);
        assert!(forward("{}", &tx).await);
        assert!(forward(r#"{"main_bot_game_id": "g"}"#, &tx).await);
        assert_eq!(
            rx.recv().await.unwrap().external_game_id,
            ExternalGameId::new("g")
        );
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward(r#"{"main_bot_game_id": "g"}"#, &tx).await);
    }
}
