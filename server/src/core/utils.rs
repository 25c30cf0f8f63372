use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;

use crate::prelude::*;
use crate::types::{APP_ID_PREFIX, APP_ID_SUFFIX_LEN};

pub const BASE36: [char; 36] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
	'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
	'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

pub const SAFE: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
	'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
	'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

fn random_chars(alphabet: &[char], len: usize) -> String {
	let mut rng = rand::rng();
	let mut result = String::with_capacity(len);
	for _ in 0..len {
		result.push(alphabet[rng.random_range(0..alphabet.len())]);
	}
	result
}

/// New opaque app id: `app_` + 8 chars of base36.
pub fn random_app_id() -> AppId {
	AppId(format!("{}{}", APP_ID_PREFIX, random_chars(&BASE36, APP_ID_SUFFIX_LEN)).into())
}

/// Opaque identifier for documents, jobs and connections.
pub fn random_id(len: usize) -> String {
	random_chars(&BASE36, len)
}

/// Session token: 43 chars of the URL-safe alphabet (~256 bits).
pub fn random_session_token() -> String {
	random_chars(&SAFE, 43)
}

pub fn b64_encode(bytes: &[u8]) -> String {
	BASE64.encode(bytes)
}

pub fn b64_decode(s: &str) -> FzResult<Vec<u8>> {
	BASE64.decode(s).map_err(|_| Error::Validation("invalid base64".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn base64_round_trip() {
		let data = b"\x00\x01binary\xff";
		assert_eq!(b64_decode(&b64_encode(data)).unwrap(), data);
		assert!(b64_decode("not valid b64!!!").is_err());
	}

	#[test]
	fn app_ids_are_well_formed() {
		for _ in 0..32 {
			let id = random_app_id();
			assert!(AppId::is_valid(id.as_str()), "bad id: {}", id);
		}
	}

	#[test]
	fn session_tokens_have_entropy() {
		let a = random_session_token();
		let b = random_session_token();
		assert_eq!(a.len(), 43);
		assert_ne!(a, b);
	}
}

// vim: ts=4
