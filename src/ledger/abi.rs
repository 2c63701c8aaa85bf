//! Minimal ABI support for the staking contract.
//!
//! Only what the indexer needs: Keccak-256 signature hashing, 32-byte word
//! access over log data and call results, and decoding of the handful of
//! Solidity types the contract emits (`uint256`, `address`, `bool`, `string`).

use sha3::{Digest, Keccak256};

use super::types::{Address, H256, LedgerError};

const WORD: usize = 32;

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
	let mut hasher = Keccak256::new();
	hasher.update(bytes);
	let digest = hasher.finalize();
	let mut out = [0u8; 32];
	out.copy_from_slice(&digest);
	out
}

/// Topic 0 for an event signature such as `Staked(uint256,address,uint256)`.
pub fn event_topic(signature: &str) -> H256 {
	H256(keccak256(signature.as_bytes()))
}

/// Four-byte selector for a function or error signature.
pub fn selector(signature: &str) -> [u8; 4] {
	let hash = keccak256(signature.as_bytes());
	[hash[0], hash[1], hash[2], hash[3]]
}

/// Encode an unsigned integer as a big-endian 32-byte word.
pub fn encode_uint(value: u128) -> [u8; 32] {
	let mut word = [0u8; 32];
	word[16..].copy_from_slice(&value.to_be_bytes());
	word
}

/// Interpret a word as `uint256`, failing if it does not fit in `u128`.
pub fn word_to_u128(word: &[u8; 32]) -> Result<u128, LedgerError> {
	if word[..16].iter().any(|b| *b != 0) {
		return Err(LedgerError::Decode(format!(
			"uint256 value 0x{} exceeds u128",
			hex::encode(word)
		)));
	}
	let mut low = [0u8; 16];
	low.copy_from_slice(&word[16..]);
	Ok(u128::from_be_bytes(low))
}

/// Interpret a word as a left-padded `address`.
pub fn word_to_address(word: &[u8; 32]) -> Result<Address, LedgerError> {
	if word[..12].iter().any(|b| *b != 0) {
		return Err(LedgerError::Decode(format!(
			"word 0x{} is not a padded address",
			hex::encode(word)
		)));
	}
	let mut address = [0u8; 20];
	address.copy_from_slice(&word[12..]);
	Ok(Address(address))
}

/// Interpret a word as `bool`.
pub fn word_to_bool(word: &[u8; 32]) -> Result<bool, LedgerError> {
	match word_to_u128(word)? {
		0 => Ok(false),
		1 => Ok(true),
		other => Err(LedgerError::Decode(format!("invalid bool value {}", other))),
	}
}

/// Sequential reader over the head/tail layout of ABI-encoded data.
///
/// Static values are read from consecutive head words; `string` reads its head
/// word as an offset into the same buffer.
pub struct AbiReader<'a> {
	data: &'a [u8],
	cursor: usize,
}

impl<'a> AbiReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data, cursor: 0 }
	}

	fn word_at(&self, offset: usize) -> Result<[u8; 32], LedgerError> {
		let end = offset
			.checked_add(WORD)
			.ok_or_else(|| LedgerError::Decode("offset overflow".to_string()))?;
		let slice = self.data.get(offset..end).ok_or_else(|| {
			LedgerError::Decode(format!(
				"data too short: need {} bytes, have {}",
				end,
				self.data.len()
			))
		})?;
		let mut word = [0u8; 32];
		word.copy_from_slice(slice);
		Ok(word)
	}

	fn next_word(&mut self) -> Result<[u8; 32], LedgerError> {
		let word = self.word_at(self.cursor)?;
		self.cursor += WORD;
		Ok(word)
	}

	pub fn uint(&mut self) -> Result<u128, LedgerError> {
		word_to_u128(&self.next_word()?)
	}

	pub fn address(&mut self) -> Result<Address, LedgerError> {
		word_to_address(&self.next_word()?)
	}

	pub fn boolean(&mut self) -> Result<bool, LedgerError> {
		word_to_bool(&self.next_word()?)
	}

	/// Raw head word, for types the reader does not interpret.
	pub fn raw(&mut self) -> Result<[u8; 32], LedgerError> {
		self.next_word()
	}

	pub fn string(&mut self) -> Result<String, LedgerError> {
		let offset = to_usize(word_to_u128(&self.next_word()?)?)?;
		let len = to_usize(word_to_u128(&self.word_at(offset)?)?)?;
		let start = offset + WORD;
		let bytes = start
			.checked_add(len)
			.and_then(|end| self.data.get(start..end))
			.ok_or_else(|| LedgerError::Decode(format!("string of {} bytes out of bounds", len)))?;
		String::from_utf8(bytes.to_vec())
			.map_err(|e| LedgerError::Decode(format!("string is not UTF-8: {}", e)))
	}
}

fn to_usize(value: u128) -> Result<usize, LedgerError> {
	usize::try_from(value).map_err(|_| LedgerError::Decode(format!("length {} out of range", value)))
}

#[cfg(test)]
pub(crate) mod test_support {
	//! Encoders used by tests to build log payloads.

	use super::encode_uint;
	use crate::ledger::types::Address;

	pub enum Token {
		Uint(u128),
		Address(Address),
		Bool(bool),
		Str(String),
	}

	pub fn encode(tokens: &[Token]) -> Vec<u8> {
		let mut head = Vec::new();
		let mut tail = Vec::new();
		let head_len = tokens.len() * 32;
		for token in tokens {
			match token {
				Token::Uint(v) => head.extend_from_slice(&encode_uint(*v)),
				Token::Address(a) => head.extend_from_slice(&address_word(a)),
				Token::Bool(b) => head.extend_from_slice(&encode_uint(*b as u128)),
				Token::Str(s) => {
					head.extend_from_slice(&encode_uint((head_len + tail.len()) as u128));
					tail.extend_from_slice(&encode_uint(s.len() as u128));
					let mut bytes = s.as_bytes().to_vec();
					bytes.resize(s.len().div_ceil(32) * 32, 0);
					tail.extend_from_slice(&bytes);
				}
			}
		}
		head.extend_from_slice(&tail);
		head
	}

	pub fn address_word(address: &Address) -> [u8; 32] {
		let mut word = [0u8; 32];
		word[12..].copy_from_slice(&address.0);
		word
	}
}
