//! EVM wire encoding: Keccak-256, Solidity ABI call data, RLP and legacy
//! (EIP-155) transactions.

use sha3::{Digest, Keccak256};

use crate::domain::{BlockchainError, RecoverableSignature};

/// Solidity signature of the contract's trade write.
pub const RECORD_TRADE_SIGNATURE: &str = "recordTrade(string,string,string,string,uint256)";
/// Solidity signature of the contract's rating write.
pub const RECORD_RATING_SIGNATURE: &str = "recordRating(string,uint8,string)";
/// Event emitted by `recordTrade`.
pub const TRADE_RECORDED_EVENT: &str =
    "TradeRecorded(string,string,string,string,uint256,uint256)";
/// Event emitted by `recordRating`.
pub const RATING_RECORDED_EVENT: &str = "RatingRecorded(string,uint8,string,uint256)";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of the Keccak-256 of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of an event log.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Topic of an `indexed string` event argument.
pub fn indexed_string_topic(value: &str) -> [u8; 32] {
    keccak256(value.as_bytes())
}

/// ABI argument. `uint8` and `uint256` share the same 32-byte encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiToken {
    Uint(u128),
    String(String),
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Encode a call: selector followed by head/tail encoded arguments.
pub fn encode_call(signature: &str, tokens: &[AbiToken]) -> Vec<u8> {
    let head_len = 32 * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            AbiToken::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            AbiToken::String(value) => {
                let offset = (head_len + tail.len()) as u128;
                head.extend_from_slice(&uint_word(offset));

                let bytes = value.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u128));
                tail.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat_n(0u8, padding));
            }
        }
    }

    let mut data = Vec::with_capacity(4 + head.len() + tail.len());
    data.extend_from_slice(&function_selector(signature));
    data.extend_from_slice(&head);
    data.extend_from_slice(&tail);
    data
}

pub fn encode_record_trade(
    trade_id: &str,
    buyer: &str,
    seller: &str,
    item: &str,
    amount: u128,
) -> Vec<u8> {
    encode_call(
        RECORD_TRADE_SIGNATURE,
        &[
            AbiToken::String(trade_id.to_string()),
            AbiToken::String(buyer.to_string()),
            AbiToken::String(seller.to_string()),
            AbiToken::String(item.to_string()),
            AbiToken::Uint(amount),
        ],
    )
}

pub fn encode_record_rating(user_email: &str, rating: u8, comment: &str) -> Vec<u8> {
    encode_call(
        RECORD_RATING_SIGNATURE,
        &[
            AbiToken::String(user_email.to_string()),
            AbiToken::Uint(u128::from(rating)),
            AbiToken::String(comment.to_string()),
        ],
    )
}

/// Recursive Length Prefix encoding.
pub mod rlp {
    fn length_prefix(len: usize, short_offset: u8, long_offset: u8) -> Vec<u8> {
        if len <= 55 {
            return vec![short_offset + len as u8];
        }
        let len_bytes = strip_leading_zeros(&len.to_be_bytes()).to_vec();
        let mut out = Vec::with_capacity(1 + len_bytes.len());
        out.push(long_offset + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out
    }

    pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        &bytes[first..]
    }

    pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        if bytes.len() == 1 && bytes[0] < 0x80 {
            return bytes.to_vec();
        }
        let mut out = length_prefix(bytes.len(), 0x80, 0xb7);
        out.extend_from_slice(bytes);
        out
    }

    /// Integers are big-endian with no leading zeros; zero is the empty string.
    pub fn encode_uint(value: u128) -> Vec<u8> {
        encode_bytes(strip_leading_zeros(&value.to_be_bytes()))
    }

    pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload_len: usize = items.iter().map(Vec::len).sum();
        let mut out = length_prefix(payload_len, 0xc0, 0xf7);
        out.reserve(payload_len);
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }
}

/// Pre-EIP-1559 transaction with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(u128::from(self.nonce)),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(u128::from(self.gas_limit)),
            rlp::encode_bytes(&self.to),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// RLP payload that is hashed and signed.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(u128::from(self.chain_id)));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Raw signed transaction bytes for `eth_sendRawTransaction`.
    pub fn encode_signed(&self, signature: &RecoverableSignature) -> Vec<u8> {
        let v = u128::from(signature.recovery_id) + u128::from(self.chain_id) * 2 + 35;
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_bytes(rlp::strip_leading_zeros(&signature.r)));
        fields.push(rlp::encode_bytes(rlp::strip_leading_zeros(&signature.s)));
        rlp::encode_list(&fields)
    }
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 20-byte `0x` address.
pub fn parse_address(value: &str) -> Result<[u8; 20], BlockchainError> {
    let bytes = hex::decode(value.trim().trim_start_matches("0x"))
        .map_err(|e| BlockchainError::Encoding(format!("invalid address '{}': {}", value, e)))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        BlockchainError::Encoding(format!("address must be 20 bytes, got {}", v.len()))
    })
}

/// Parse a JSON-RPC hex quantity such as `0x1a`.
pub fn parse_quantity(value: &str) -> Result<u128, BlockchainError> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| BlockchainError::Encoding(format!("invalid quantity '{}': {}", value, e)))
}

/// Format a JSON-RPC hex quantity.
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}
