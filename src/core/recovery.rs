//! Rebuilds a signed Ethereum transaction from the unsigned RLP message and the
//! detached 65-byte signature carried by the EVM loader instructions.
//!
//! Legacy transactions only. The unsigned message is either the EIP-155 form
//! `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]` or the pre-EIP-155
//! form `[nonce, gasPrice, gas, to, value, data]`.

use rlp::{Rlp, RlpStream};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use tiny_keccak::{Hasher, Keccak};

use crate::core::instruction::SIGNATURE_LEN;
use crate::utils::error::{IndexerError, Result};

const LEGACY_FIELDS: usize = 6;
const EIP155_FIELDS: usize = 9;
const TO_FIELD: usize = 3;
const CHAIN_ID_FIELD: usize = 6;

/// A self-consistent signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTransaction {
    /// RLP bytes of the signed transaction.
    pub raw: Vec<u8>,
    /// `keccak256(raw)`.
    pub hash: [u8; 32],
    pub sender: [u8; 20],
    /// Address of the created contract when `to` is empty.
    pub contract: Option<[u8; 20]>,
}

impl RecoveredTransaction {
    #[must_use]
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }

    #[must_use]
    pub fn sender_hex(&self) -> String {
        format!("0x{}", hex::encode(self.sender))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

fn address_of(public_key: &secp256k1::PublicKey) -> [u8; 20] {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Recovers the raw signed transaction, its hash and sender.
///
/// The recovery id is the 65th signature byte; both `0/1` and `27/28` are accepted.
///
/// # Errors
///
/// `IndexerError::RecoveryError` when the message is not a 6- or 9-item RLP list,
/// the chain id is not an integer, or the signature does not recover a public key.
pub fn recover_signed_transaction(
    unsigned_msg: &[u8],
    signature: &[u8],
) -> Result<RecoveredTransaction> {
    if signature.len() != SIGNATURE_LEN {
        return Err(IndexerError::RecoveryError(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let message = Rlp::new(unsigned_msg);
    if !message.is_list() {
        return Err(IndexerError::RecoveryError(
            "unsigned message is not an RLP list".to_string(),
        ));
    }

    let recovery_byte = match signature[64] {
        v @ (27 | 28) => v - 27,
        v => v,
    };
    let recovery_id = RecoveryId::try_from(i32::from(recovery_byte))?;

    let v = match message.item_count()? {
        EIP155_FIELDS => {
            let chain_id: u64 = message.at(CHAIN_ID_FIELD)?.as_val()?;
            chain_id
                .checked_mul(2)
                .and_then(|x| x.checked_add(35 + u64::from(recovery_byte)))
                .ok_or_else(|| {
                    IndexerError::RecoveryError(format!("chain id {chain_id} out of range"))
                })?
        }
        LEGACY_FIELDS => 27 + u64::from(recovery_byte),
        other => {
            return Err(IndexerError::RecoveryError(format!(
                "unsigned message has {other} fields, expected {LEGACY_FIELDS} or {EIP155_FIELDS}"
            )));
        }
    };

    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let digest = Message::from_digest(keccak256(unsigned_msg));
    let public_key = Secp256k1::recover_ecdsa(secp256k1::SECP256K1, &digest, &recoverable)?;
    let sender = address_of(&public_key);

    let mut signed = RlpStream::new_list(EIP155_FIELDS);
    for index in 0..LEGACY_FIELDS {
        signed.append_raw(message.at(index)?.as_raw(), 1);
    }
    signed.append(&v);
    signed.append(&trim_leading_zeros(&signature[..32]));
    signed.append(&trim_leading_zeros(&signature[32..64]));
    let raw = signed.out().to_vec();

    let contract = if message.at(TO_FIELD)?.data()?.is_empty() {
        let mut creation = RlpStream::new_list(2);
        creation.append(&sender.to_vec());
        creation.append_raw(message.at(0)?.as_raw(), 1);
        let digest = keccak256(&creation.out());
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Some(address)
    } else {
        None
    };

    Ok(RecoveredTransaction {
        hash: keccak256(&raw),
        raw,
        sender,
        contract,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Signing helpers shared by unit and integration-style tests.

    use super::*;
    use secp256k1::SecretKey;

    pub fn secret_key(seed: u8) -> SecretKey {
        SecretKey::from_slice(&[seed; 32]).expect("valid secret key")
    }

    pub fn address_for(seed: u8) -> [u8; 20] {
        address_of(&secret_key(seed).public_key(secp256k1::SECP256K1))
    }

    /// EIP-155 unsigned message for a simple value transfer or contract creation.
    pub fn unsigned_message(nonce: u64, to: Option<[u8; 20]>, chain_id: u64) -> Vec<u8> {
        let mut stream = RlpStream::new_list(EIP155_FIELDS);
        stream.append(&nonce);
        stream.append(&1_000_000_000u64);
        stream.append(&21_000u64);
        match to {
            Some(to) => stream.append(&to.to_vec()),
            None => stream.append_empty_data(),
        };
        stream.append(&0u64);
        stream.append(&Vec::<u8>::new());
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    /// Detached `r || s || recid` signature over `keccak256(unsigned_msg)`.
    pub fn sign(unsigned_msg: &[u8], seed: u8) -> Vec<u8> {
        let digest = Message::from_digest(keccak256(unsigned_msg));
        let signature =
            Secp256k1::sign_ecdsa_recoverable(secp256k1::SECP256K1, &digest, &secret_key(seed));
        let (recovery_id, compact) = signature.serialize_compact();
        let mut out = compact.to_vec();
        out.push(u8::try_from(i32::from(recovery_id)).expect("recovery id fits in a byte"));
        out
    }
}
