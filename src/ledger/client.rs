//!
//! JSON-RPC client for an EVM ledger node.
//!
//! Queries (`eth_blockNumber`, `eth_getLogs`, `eth_call`) go over HTTP; live log
//! delivery uses `eth_subscribe` over a WebSocket. All methods are async and
//! designed for use with Tokio.

use super::types::*;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ledger JSON-RPC client
#[derive(Clone)]
pub struct LedgerRpcClient {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// The HTTP JSON-RPC endpoint.
	rpc_url: String,
	/// The WebSocket endpoint for subscriptions, if configured.
	ws_url: Option<String>,
	/// Request id counter shared by clones.
	next_id: Arc<AtomicU64>,
}

impl LedgerRpcClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions, if any.
	/// * `timeout` - Per-request timeout for HTTP calls.
	pub fn new(
		rpc_url: String,
		ws_url: Option<String>,
		timeout: Duration,
	) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			next_id: Arc::new(AtomicU64::new(1)),
		})
	}

	/// Whether a WebSocket endpoint is configured.
	pub fn has_ws(&self) -> bool {
		self.ws_url.is_some()
	}

	fn request_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Execute a JSON-RPC call and deserialize its `result`.
	///
	/// HTTP 429 is reported as `RateLimited`; JSON-RPC error objects are
	/// classified by `LedgerError::from_rpc`.
	pub async fn execute_call<T: DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, LedgerError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.request_id(),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		let status = response.status();
		if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
			return Err(LedgerError::RateLimited(format!("{} returned 429", method)));
		}
		if !status.is_success() {
			return Err(LedgerError::Rpc {
				code: i64::from(status.as_u16()),
				message: format!("HTTP error calling {}: {}", method, status),
			});
		}

		let mut response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			let error: RpcErrorObject = serde_json::from_value(error.clone())?;
			return Err(LedgerError::from_rpc(error));
		}

		let result = response_json
			.get_mut("result")
			.map(Value::take)
			.ok_or(LedgerError::NoData)?;
		Ok(serde_json::from_value(result)?)
	}

	/// Latest block number known to the node.
	pub async fn block_number(&self) -> Result<u64, LedgerError> {
		let quantity: String = self.execute_call("eth_blockNumber", json!([])).await?;
		parse_quantity(&quantity)
	}

	/// Fetch logs matching a filter.
	pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, LedgerError> {
		debug!(
			"eth_getLogs from {:?} to {:?}",
			filter.from_block, filter.to_block
		);
		self.execute_call("eth_getLogs", json!([filter])).await
	}

	/// Read-only contract call against the latest block.
	pub async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
		let result: String = self
			.execute_call(
				"eth_call",
				json!([
					{ "to": to.to_lower_hex(), "data": format!("0x{}", hex::encode(data)) },
					"latest"
				]),
			)
			.await?;
		decode_hex_prefixed(&result)
	}

	/// Subscribe to logs matching a filter.
	///
	/// Returns a `LogSubscription` that yields logs as they are pushed. The
	/// subscription ends when the socket closes or `unsubscribe` is called.
	///
	/// # Errors
	/// Returns `LedgerError` if no WebSocket endpoint is configured, or if the
	/// connection or subscription request fails.
	pub async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, LedgerError> {
		let ws_url = self.ws_url.as_ref().ok_or_else(|| {
			LedgerError::SubscriptionError("no WebSocket endpoint configured".to_string())
		})?;

		debug!("Attempting WebSocket connection to: {}", ws_url);
		let request = ws_url.clone().into_client_request()?;
		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let request_id = self.request_id();
		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": request_id,
			"method": "eth_subscribe",
			"params": ["logs", filter],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = loop {
			let msg = ws_receiver.next().await.ok_or_else(|| {
				LedgerError::SubscriptionError("socket closed during handshake".to_string())
			})??;
			match msg {
				Message::Text(text) => {
					let parsed: Value = serde_json::from_str(&text)?;
					if parsed.get("id").and_then(Value::as_u64) != Some(request_id) {
						debug!("Ignoring message during handshake: {}", text);
						continue;
					}
					if let Some(error) = parsed.get("error") {
						let error: RpcErrorObject = serde_json::from_value(error.clone())?;
						return Err(LedgerError::from_rpc(error));
					}
					break parsed
						.get("result")
						.and_then(Value::as_str)
						.ok_or(LedgerError::NoData)?
						.to_string();
				}
				Message::Ping(payload) => ws_sender.send(Message::Pong(payload)).await?,
				_ => {
					return Err(LedgerError::SubscriptionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			}
		};

		info!("Established log subscription {}", subscription_id);
		Ok(LogSubscription {
			id: subscription_id,
			sender: ws_sender,
			receiver: ws_receiver,
			next_id: self.next_id.clone(),
		})
	}
}

/// An active `eth_subscribe("logs")` subscription.
pub struct LogSubscription {
	id: String,
	sender: SplitSink<WsStream, Message>,
	receiver: SplitStream<WsStream>,
	next_id: Arc<AtomicU64>,
}

impl LogSubscription {
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Next pushed log, `None` once the server closes the subscription.
	pub async fn next_log(&mut self) -> Option<Result<RpcLog, LedgerError>> {
		loop {
			let msg = match self.receiver.next().await? {
				Ok(msg) => msg,
				Err(e) => return Some(Err(LedgerError::WebSocketError(e))),
			};
			match msg {
				Message::Text(text) => {
					if let Some(item) = self.parse_notification(&text) {
						return Some(item);
					}
				}
				Message::Ping(payload) => {
					if let Err(e) = self.sender.send(Message::Pong(payload)).await {
						return Some(Err(LedgerError::WebSocketError(e)));
					}
				}
				Message::Close(frame) => {
					debug!("Subscription {} closed by server: {:?}", self.id, frame);
					return None;
				}
				_ => debug!("Ignoring non-text subscription message"),
			}
		}
	}

	fn parse_notification(&self, text: &str) -> Option<Result<RpcLog, LedgerError>> {
		let parsed: Value = match serde_json::from_str(text) {
			Ok(parsed) => parsed,
			Err(e) => return Some(Err(LedgerError::JsonError(e))),
		};

		if parsed.get("method").and_then(Value::as_str) != Some("eth_subscription") {
			debug!("Ignoring message: {}", text);
			return None;
		}

		let params = parsed.get("params")?;
		if params.get("subscription").and_then(Value::as_str) != Some(self.id.as_str()) {
			return None;
		}

		let result = params.get("result")?.clone();
		Some(serde_json::from_value::<RpcLog>(result).map_err(LedgerError::JsonError))
	}

	/// Cancel the subscription and close the socket.
	pub async fn unsubscribe(mut self) {
		let message = json!({
			"jsonrpc": "2.0",
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"method": "eth_unsubscribe",
			"params": [self.id],
		});
		if let Err(e) = self.sender.send(Message::Text(message.to_string())).await {
			warn!("Failed to send eth_unsubscribe for {}: {}", self.id, e);
		}
		if let Err(e) = self.sender.close().await {
			debug!("Error closing subscription socket: {}", e);
		}
		info!("Detached log subscription {}", self.id);
	}
}
