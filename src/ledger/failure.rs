//! Decoding of revert payloads returned by rejected contract calls.
//!
//! A revert payload starts with a four-byte selector followed by ABI-encoded
//! arguments. The decoder maps selectors of declared custom errors to their
//! names and messages, and also understands the built-in `Error(string)` and
//! `Panic(uint256)` forms. Decoding never fails: an unrecognised selector is a
//! regular `DecodedFailure::Unknown` result.

use std::collections::BTreeMap;
use std::fmt;

use super::abi::{self, AbiReader};
use super::types::decode_hex_prefixed;

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Custom errors declared by the staking contract, with their messages.
const STAKING_FAILURES: &[(&str, Option<&str>)] = &[
	(
		"StakeNotFound()",
		Some("The stake ID does not exist or is invalid"),
	),
	(
		"UnauthorizedWithdrawal()",
		Some("You are not the owner of this stake"),
	),
	(
		"LockupNotCompleted()",
		Some("The lockup period has not ended yet"),
	),
	(
		"RewardAlreadyClaimed()",
		Some("Rewards for this stake have already been claimed"),
	),
	(
		"StakingNotLocked()",
		Some("The stake has already been withdrawn"),
	),
	("InvalidAmount()", None),
	("InvalidDuration()", None),
	("StakingPaused()", None),
];

/// Four-byte error selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector(pub [u8; 4]);

impl fmt::Display for Selector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

/// A declared error signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignature {
	pub name: String,
	pub params: Vec<String>,
	pub message: Option<String>,
}

impl FailureSignature {
	/// Parse `Name(type1,type2)`. Returns `None` for malformed signatures.
	pub fn parse(signature: &str, message: Option<&str>) -> Option<Self> {
		let open = signature.find('(')?;
		let inner = signature[open + 1..].strip_suffix(')')?;
		let name = signature[..open].trim();
		if name.is_empty() {
			return None;
		}
		let params = inner
			.split(',')
			.map(str::trim)
			.filter(|p| !p.is_empty())
			.map(str::to_string)
			.collect();
		Some(Self {
			name: name.to_string(),
			params,
			message: message.map(str::to_string),
		})
	}

	pub fn canonical(&self) -> String {
		format!("{}({})", self.name, self.params.join(","))
	}
}

/// Result of decoding a revert payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFailure {
	/// A declared custom error.
	Known {
		name: String,
		args: Vec<String>,
		message: String,
	},
	/// `Error(string)` revert with a reason.
	Revert { reason: String },
	/// `Panic(uint256)` with its code.
	Panic { code: u128 },
	/// Selector not in the declared set.
	Unknown { selector: Selector },
	/// Payload shorter than a selector, or not hex.
	Empty,
}

impl DecodedFailure {
	pub fn name(&self) -> &str {
		match self {
			DecodedFailure::Known { name, .. } => name,
			DecodedFailure::Revert { .. } => "Error",
			DecodedFailure::Panic { .. } => "Panic",
			DecodedFailure::Unknown { .. } => "UnknownError",
			DecodedFailure::Empty => "EmptyRevert",
		}
	}

	pub fn message(&self) -> String {
		match self {
			DecodedFailure::Known { message, .. } => message.clone(),
			DecodedFailure::Revert { reason } => reason.clone(),
			DecodedFailure::Panic { code } => format!("Panic with code {:#04x}", code),
			DecodedFailure::Unknown { selector } => {
				format!("Unknown custom error with selector: {}", selector)
			}
			DecodedFailure::Empty => "Revert without a selector".to_string(),
		}
	}
}

/// Selector table over a set of declared error signatures.
#[derive(Debug, Clone, Default)]
pub struct FailureDecoder {
	by_selector: BTreeMap<Selector, FailureSignature>,
}

impl FailureDecoder {
	/// Build a decoder from `(signature, message)` pairs. Malformed signatures
	/// are ignored.
	pub fn new<'a>(signatures: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
		let by_selector = signatures
			.into_iter()
			.filter_map(|(signature, message)| FailureSignature::parse(signature, message))
			.map(|sig| (Selector(abi::selector(&sig.canonical())), sig))
			.collect();
		Self { by_selector }
	}

	/// Decoder for the staking contract's custom errors.
	pub fn staking() -> Self {
		Self::new(STAKING_FAILURES.iter().copied())
	}

	/// Declared selectors and their signatures, ordered by selector.
	pub fn declared(&self) -> impl Iterator<Item = (&Selector, &FailureSignature)> {
		self.by_selector.iter()
	}

	/// Decode a `0x`-prefixed or bare hex payload.
	pub fn decode_hex(&self, payload: &str) -> DecodedFailure {
		match decode_hex_prefixed(payload.trim()) {
			Ok(bytes) => self.decode(&bytes),
			Err(_) => DecodedFailure::Empty,
		}
	}

	pub fn decode(&self, payload: &[u8]) -> DecodedFailure {
		if payload.len() < 4 {
			return DecodedFailure::Empty;
		}
		let selector = Selector([payload[0], payload[1], payload[2], payload[3]]);
		let body = &payload[4..];

		if selector.0 == ERROR_STRING_SELECTOR {
			if let Ok(reason) = AbiReader::new(body).string() {
				return DecodedFailure::Revert { reason };
			}
		}
		if selector.0 == PANIC_SELECTOR {
			if let Ok(code) = AbiReader::new(body).uint() {
				return DecodedFailure::Panic { code };
			}
		}

		match self.by_selector.get(&selector) {
			Some(signature) => {
				let args = decode_args(&signature.params, body);
				let message = match (&signature.message, &args) {
					(Some(message), _) => message.clone(),
					(None, Some(args)) if !args.is_empty() => {
						format!("{}({})", signature.name, args.join(", "))
					}
					(None, _) => format!("Custom error: {}", signature.name),
				};
				DecodedFailure::Known {
					name: signature.name.clone(),
					args: args.unwrap_or_default(),
					message,
				}
			}
			None => DecodedFailure::Unknown { selector },
		}
	}
}

/// Decode static arguments for display; `None` if the body does not match.
fn decode_args(params: &[String], body: &[u8]) -> Option<Vec<String>> {
	let mut reader = AbiReader::new(body);
	params
		.iter()
		.map(|param| match param.as_str() {
			"address" => reader.address().ok().map(|a| a.to_string()),
			"bool" => reader.boolean().ok().map(|b| b.to_string()),
			p => reader.raw().ok().map(|word| format_word(p, &word)),
		})
		.collect()
}

/// Render one head word of static type `param`. Integers outside the 128-bit
/// range and unknown types fall back to the hex word.
fn format_word(param: &str, word: &[u8; 32]) -> String {
	let mut low = [0u8; 16];
	low.copy_from_slice(&word[16..]);

	if param.starts_with("uint") {
		if word[..16].iter().all(|b| *b == 0) {
			return u128::from_be_bytes(low).to_string();
		}
	} else if param.starts_with("int") {
		let fill = if word[16] & 0x80 != 0 { 0xff } else { 0x00 };
		if word[..16].iter().all(|b| *b == fill) {
			return i128::from_be_bytes(low).to_string();
		}
	} else if let Some(size) = param
		.strip_prefix("bytes")
		.and_then(|n| n.parse::<usize>().ok())
	{
		// bytesN is left-aligned in its word
		if (1..=32).contains(&size) {
			return format!("0x{}", hex::encode(&word[..size]));
		}
	}
	format!("0x{}", hex::encode(word))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::abi::encode_uint;

	#[test]
	fn decodes_declared_selector() {
		let decoder = FailureDecoder::staking();
		let payload = abi::selector("RewardAlreadyClaimed()");

		let decoded = decoder.decode(&payload);
		assert_eq!(decoded.name(), "RewardAlreadyClaimed");
		assert_eq!(
			decoded.message(),
			"Rewards for this stake have already been claimed"
		);
	}

	#[test]
	fn declared_error_without_message_gets_generic_text() {
		let decoder = FailureDecoder::staking();
		let payload = format!("0x{}", hex::encode(abi::selector("StakingPaused()")));

		let decoded = decoder.decode_hex(&payload);
		assert_eq!(decoded.message(), "Custom error: StakingPaused");
	}

	#[test]
	fn unknown_selector_is_a_result_not_an_error() {
		let decoder = FailureDecoder::staking();
		let decoded = decoder.decode_hex("0xdeadbeef0000");
		assert_eq!(
			decoded,
			DecodedFailure::Unknown {
				selector: Selector([0xde, 0xad, 0xbe, 0xef])
			}
		);
		assert_eq!(decoded.name(), "UnknownError");
		assert_eq!(
			decoded.message(),
			"Unknown custom error with selector: 0xdeadbeef"
		);
	}

	#[test]
	fn short_or_invalid_payloads_are_empty() {
		let decoder = FailureDecoder::staking();
		assert_eq!(decoder.decode(&[0x01, 0x02]), DecodedFailure::Empty);
		assert_eq!(decoder.decode_hex("not hex"), DecodedFailure::Empty);
	}

	#[test]
	fn decodes_builtin_revert_and_panic() {
		let decoder = FailureDecoder::staking();

		let mut revert = ERROR_STRING_SELECTOR.to_vec();
		revert.extend_from_slice(&encode_uint(32));
		revert.extend_from_slice(&encode_uint(5));
		let mut text = b"nope!".to_vec();
		text.resize(32, 0);
		revert.extend_from_slice(&text);
		assert_eq!(
			decoder.decode(&revert),
			DecodedFailure::Revert {
				reason: "nope!".to_string()
			}
		);

		let mut panic = PANIC_SELECTOR.to_vec();
		panic.extend_from_slice(&encode_uint(0x11));
		assert_eq!(decoder.decode(&panic), DecodedFailure::Panic { code: 0x11 });
	}

	#[test]
	fn formats_static_arguments() {
		let decoder = FailureDecoder::new([("InsufficientStake(uint256,uint256)", None)]);
		let mut payload = abi::selector("InsufficientStake(uint256,uint256)").to_vec();
		payload.extend_from_slice(&encode_uint(10));
		payload.extend_from_slice(&encode_uint(20));

		match decoder.decode(&payload) {
			DecodedFailure::Known { args, message, .. } => {
				assert_eq!(args, vec!["10", "20"]);
				assert_eq!(message, "InsufficientStake(10, 20)");
			}
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn formats_signed_integers_and_fixed_bytes() {
		let signature = "OutOfRange(int256,bytes4,bytes32,uint256)";
		let decoder = FailureDecoder::new([(signature, None)]);
		let mut payload = abi::selector(signature).to_vec();
		// -5 in two's complement
		let mut negative = [0xffu8; 32];
		negative[31] = 0xfb;
		payload.extend_from_slice(&negative);
		let mut tag = [0u8; 32];
		tag[..4].copy_from_slice(&[0xca, 0xfe, 0xba, 0xbe]);
		payload.extend_from_slice(&tag);
		payload.extend_from_slice(&[0x11; 32]);
		// Larger than u128
		let mut huge = [0u8; 32];
		huge[0] = 0x01;
		payload.extend_from_slice(&huge);

		match decoder.decode(&payload) {
			DecodedFailure::Known { args, .. } => {
				assert_eq!(args[0], "-5");
				assert_eq!(args[1], "0xcafebabe");
				assert_eq!(args[2], format!("0x{}", "11".repeat(32)));
				assert_eq!(args[3], format!("0x01{}", "00".repeat(31)));
			}
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn positive_int_renders_as_decimal() {
		assert_eq!(format_word("int64", &encode_uint(42)), "42");
		assert_eq!(format_word("uint8", &encode_uint(7)), "7");
	}

	#[test]
	fn lists_all_declared_failures() {
		let decoder = FailureDecoder::staking();
		let names: Vec<_> = decoder.declared().map(|(_, s)| s.name.as_str()).collect();
		assert_eq!(names.len(), STAKING_FAILURES.len());
		assert!(names.contains(&"StakeNotFound"));
	}
}
