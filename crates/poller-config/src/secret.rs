//! Reconstruction of injected secrets (signer URL, exchange keys, per-invoice
//! relayer key) that may arrive split across a parameter store and a secret
//! manager. Splitting happens once, out of band, by whatever deploys the
//! shares; this module only has to combine them back before first use.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretShareMethod {
	Shamir,
	Xor,
	Concat,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SecretError {
	#[error("share does not carry the expected method tag or length")]
	InvalidShareFormat,
	#[error("shares could not be combined into the original secret")]
	ReconstructionFailed,
}

const TAG_SHAMIR: u8 = 0x53;
const TAG_XOR: u8 = 0x58;
const TAG_CONCAT: u8 = 0x43;

/// GF(2^8) multiplication under the AES reduction polynomial x^8+x^4+x^3+x+1 (0x11b).
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
	let mut result = 0u8;
	for _ in 0..8 {
		if b & 1 != 0 {
			result ^= a;
		}
		let high_bit_set = a & 0x80 != 0;
		a <<= 1;
		if high_bit_set {
			a ^= 0x1b;
		}
		b >>= 1;
	}
	result
}

/// Splits `secret` into two shares that [`reconstruct`] can recombine under
/// the same method. The caller is responsible for delivering each share to a
/// separate store.
pub fn split(method: SecretShareMethod, secret: &[u8]) -> (Vec<u8>, Vec<u8>) {
	match method {
		SecretShareMethod::Shamir => {
			let mut share_a = vec![TAG_SHAMIR, 1];
			let mut share_b = vec![TAG_SHAMIR, 2];
			for &byte in secret {
				let coeff: u8 = rand::random();
				share_a.push(byte ^ gf_mul(coeff, 1));
				share_b.push(byte ^ gf_mul(coeff, 2));
			}
			(share_a, share_b)
		},
		SecretShareMethod::Xor => {
			let mut mask = vec![0u8; secret.len()];
			rand::thread_rng().fill(mask.as_mut_slice());
			let masked: Vec<u8> = secret.iter().zip(&mask).map(|(s, m)| s ^ m).collect();
			let mut share_a = vec![TAG_XOR];
			share_a.extend_from_slice(&mask);
			let mut share_b = vec![TAG_XOR];
			share_b.extend_from_slice(&masked);
			(share_a, share_b)
		},
		SecretShareMethod::Concat => {
			let mid = secret.len().div_ceil(2);
			let mut share_a = vec![TAG_CONCAT, 1];
			share_a.extend_from_slice(&secret[..mid]);
			let mut share_b = vec![TAG_CONCAT, 2];
			share_b.extend_from_slice(&secret[mid..]);
			(share_a, share_b)
		},
	}
}

/// Recombines two shares produced by [`split`] under the given method.
/// Shares produced under a different method, or mismatched/corrupt shares,
/// fail rather than silently returning garbage.
pub fn reconstruct(method: SecretShareMethod, share_a: &[u8], share_b: &[u8]) -> Result<Vec<u8>, SecretError> {
	match method {
		SecretShareMethod::Shamir => {
			if share_a.len() < 2 || share_b.len() < 2 {
				return Err(SecretError::InvalidShareFormat);
			}
			if share_a[0] != TAG_SHAMIR || share_b[0] != TAG_SHAMIR {
				return Err(SecretError::InvalidShareFormat);
			}
			let (x_a, payload_a) = (share_a[1], &share_a[2..]);
			let (x_b, payload_b) = (share_b[1], &share_b[2..]);
			if payload_a.len() != payload_b.len() {
				return Err(SecretError::InvalidShareFormat);
			}
			let (y1, y2) = match (x_a, x_b) {
				(1, 2) => (payload_a, payload_b),
				(2, 1) => (payload_b, payload_a),
				_ => return Err(SecretError::ReconstructionFailed),
			};
			Ok(y1.iter().zip(y2).map(|(&a, &b)| gf_mul(a, 2) ^ b).collect())
		},
		SecretShareMethod::Xor => {
			if share_a.is_empty() || share_b.is_empty() {
				return Err(SecretError::InvalidShareFormat);
			}
			if share_a[0] != TAG_XOR || share_b[0] != TAG_XOR {
				return Err(SecretError::InvalidShareFormat);
			}
			let (payload_a, payload_b) = (&share_a[1..], &share_b[1..]);
			if payload_a.len() != payload_b.len() {
				return Err(SecretError::InvalidShareFormat);
			}
			Ok(payload_a.iter().zip(payload_b).map(|(&a, &b)| a ^ b).collect())
		},
		SecretShareMethod::Concat => {
			if share_a.len() < 2 || share_b.len() < 2 {
				return Err(SecretError::InvalidShareFormat);
			}
			if share_a[0] != TAG_CONCAT || share_b[0] != TAG_CONCAT {
				return Err(SecretError::InvalidShareFormat);
			}
			let (marker_a, payload_a) = (share_a[1], &share_a[2..]);
			let (marker_b, payload_b) = (share_b[1], &share_b[2..]);
			match (marker_a, marker_b) {
				(1, 2) => Ok([payload_a, payload_b].concat()),
				(2, 1) => Ok([payload_b, payload_a].concat()),
				_ => Err(SecretError::ReconstructionFailed),
			}
		},
	}
}

/// Errors resolving a secret from the environment, as opposed to from an
/// already-obtained pair of shares (see [`SecretError`]).
#[derive(Debug, thiserror::Error)]
pub enum SecretEnvError {
	#[error("environment variable {0} is not set, directly or as split shares")]
	Missing(String),
	#[error("invalid hex in secret environment variable: {0}")]
	InvalidHex(#[from] hex::FromHexError),
	#[error(transparent)]
	Reconstruction(#[from] SecretError),
	#[error("secret bytes were not valid utf-8: {0}")]
	InvalidUtf8(#[from] std::string::FromUtf8Error),
	#[error("unknown secret share method {0}")]
	UnknownMethod(String),
}

fn env_var(name: &str, missing_as: &str) -> Result<String, SecretEnvError> {
	std::env::var(name).map_err(|_| SecretEnvError::Missing(missing_as.to_string()))
}

fn resolve_share_method(var: &str) -> Result<SecretShareMethod, SecretEnvError> {
	match env_var(&format!("{var}_METHOD"), var)?.as_str() {
		"shamir" => Ok(SecretShareMethod::Shamir),
		"xor" => Ok(SecretShareMethod::Xor),
		"concat" => Ok(SecretShareMethod::Concat),
		other => Err(SecretEnvError::UnknownMethod(other.to_string())),
	}
}

fn resolve_share_bytes(var: &str) -> Result<Vec<u8>, SecretEnvError> {
	let method = resolve_share_method(var)?;
	let share_a = hex::decode(env_var(&format!("{var}_SHARE_A"), var)?)?;
	let share_b = hex::decode(env_var(&format!("{var}_SHARE_B"), var)?)?;
	Ok(reconstruct(method, &share_a, &share_b)?)
}

/// Resolves a secret as raw bytes from `{var}` directly (hex-encoded), or, if
/// unset, recombined from `{var}_SHARE_A`/`{var}_SHARE_B` under `{var}_METHOD`.
pub fn resolve_bytes(var: &str) -> Result<Vec<u8>, SecretEnvError> {
	if let Ok(value) = std::env::var(var) {
		return Ok(hex::decode(value.trim_start_matches("0x"))?);
	}
	resolve_share_bytes(var)
}

/// Same resolution order as [`resolve_bytes`], but a direct `{var}` value is
/// taken verbatim rather than hex-decoded (exchange keys/secrets are rarely
/// hex); split shares are still combined from hex-encoded halves.
pub fn resolve_string(var: &str) -> Result<String, SecretEnvError> {
	if let Ok(value) = std::env::var(var) {
		return Ok(value);
	}
	Ok(String::from_utf8(resolve_share_bytes(var)?)?)
}

/// Resolves the EOA private key for one chain from `POLLER_SIGNER_KEY_{chain}`.
pub fn resolve_signer_key(chain_id: u64) -> Result<Vec<u8>, SecretEnvError> {
	resolve_bytes(&format!("POLLER_SIGNER_KEY_{chain_id}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shamir_round_trips() {
		let secret = b"super-secret-api-key".to_vec();
		let (a, b) = split(SecretShareMethod::Shamir, &secret);
		assert_eq!(reconstruct(SecretShareMethod::Shamir, &a, &b).unwrap(), secret);
		assert_eq!(reconstruct(SecretShareMethod::Shamir, &b, &a).unwrap(), secret);
	}

	#[test]
	fn xor_round_trips() {
		let secret = b"another-secret".to_vec();
		let (a, b) = split(SecretShareMethod::Xor, &secret);
		assert_eq!(reconstruct(SecretShareMethod::Xor, &a, &b).unwrap(), secret);
	}

	#[test]
	fn concat_round_trips() {
		let secret = b"odd-length-secret-value".to_vec();
		let (a, b) = split(SecretShareMethod::Concat, &secret);
		assert_eq!(reconstruct(SecretShareMethod::Concat, &a, &b).unwrap(), secret);
	}

	#[test]
	fn wrong_method_combination_fails() {
		let secret = b"mismatched".to_vec();
		let (a, _) = split(SecretShareMethod::Shamir, &secret);
		let (_, b) = split(SecretShareMethod::Xor, &secret);
		let err = reconstruct(SecretShareMethod::Shamir, &a, &b).unwrap_err();
		assert_eq!(err, SecretError::InvalidShareFormat);
	}

	#[test]
	fn empty_secret_round_trips_under_every_method() {
		for method in [SecretShareMethod::Shamir, SecretShareMethod::Xor, SecretShareMethod::Concat] {
			let (a, b) = split(method, &[]);
			assert_eq!(reconstruct(method, &a, &b).unwrap(), Vec::<u8>::new());
		}
	}

	#[test]
	fn resolve_bytes_reads_the_plain_variable_first() {
		std::env::set_var("TEST_SECRET_BYTES_PLAIN", "deadbeef");
		assert_eq!(resolve_bytes("TEST_SECRET_BYTES_PLAIN").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
		std::env::remove_var("TEST_SECRET_BYTES_PLAIN");
	}

	#[test]
	fn resolve_bytes_falls_back_to_split_shares() {
		let secret = vec![1u8, 2, 3, 4];
		let (a, b) = split(SecretShareMethod::Xor, &secret);
		std::env::set_var("TEST_SECRET_BYTES_SPLIT_METHOD", "xor");
		std::env::set_var("TEST_SECRET_BYTES_SPLIT_SHARE_A", hex::encode(a));
		std::env::set_var("TEST_SECRET_BYTES_SPLIT_SHARE_B", hex::encode(b));
		assert_eq!(resolve_bytes("TEST_SECRET_BYTES_SPLIT").unwrap(), secret);
		std::env::remove_var("TEST_SECRET_BYTES_SPLIT_METHOD");
		std::env::remove_var("TEST_SECRET_BYTES_SPLIT_SHARE_A");
		std::env::remove_var("TEST_SECRET_BYTES_SPLIT_SHARE_B");
	}

	#[test]
	fn resolve_string_takes_a_direct_value_verbatim() {
		std::env::set_var("TEST_SECRET_STRING_PLAIN", "my-api-key");
		assert_eq!(resolve_string("TEST_SECRET_STRING_PLAIN").unwrap(), "my-api-key");
		std::env::remove_var("TEST_SECRET_STRING_PLAIN");
	}
}
