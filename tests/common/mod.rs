//! Mock RPC chain and EVM loader payload builders shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use evm_receipt_indexer::core::recovery::keccak256;
use evm_receipt_indexer::{EvmIndexer, IndexerConfigBuilder, RetryConfig, Storage, StorageBackend};
use rlp::RlpStream;
use secp256k1::{Message, Secp256k1, SecretKey};
use serde_json::{Value, json};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn sig(seed: u8) -> String {
    Signature::from([seed; 64]).to_string()
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "result": result, "id": 1 }))
}

/// One ledger transaction as the mock RPC serves it.
pub struct MockTx {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
    pub keys: Vec<Pubkey>,
    pub instructions: Vec<Value>,
    pub inner: Vec<Value>,
}

impl MockTx {
    /// Account keys are `[payer, a, b, program]`.
    pub fn new(seed: u8, slot: u64, program: Pubkey, a: Pubkey, b: Pubkey) -> Self {
        Self {
            signature: sig(seed),
            slot,
            failed: false,
            keys: vec![Pubkey::new_unique(), a, b, program],
            instructions: Vec::new(),
            inner: Vec::new(),
        }
    }

    /// Top-level program instruction over key indices.
    pub fn instruction(mut self, accounts: &[u8], data: &[u8]) -> Self {
        self.instructions.push(compiled(3, accounts, data));
        self
    }

    /// Result markers emitted as inner program instructions of instruction 0.
    pub fn markers(mut self, markers: &[Vec<u8>]) -> Self {
        let instructions: Vec<Value> = markers.iter().map(|m| compiled(3, &[], m)).collect();
        self.inner.push(json!({ "index": 0, "instructions": instructions }));
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }

    fn status_json(&self) -> Value {
        let err = if self.failed {
            json!({ "InstructionError": [0, "InvalidArgument"] })
        } else {
            Value::Null
        };
        json!({
            "signature": self.signature,
            "slot": self.slot,
            "err": err,
            "memo": null,
            "blockTime": null,
            "confirmationStatus": "finalized"
        })
    }

    fn transaction_json(&self) -> Value {
        let (err, status) = if self.failed {
            let err = json!({ "InstructionError": [0, "InvalidArgument"] });
            (err.clone(), json!({ "Err": err }))
        } else {
            (Value::Null, json!({ "Ok": null }))
        };
        json!({
            "slot": self.slot,
            "blockTime": null,
            "transaction": {
                "signatures": [self.signature],
                "message": {
                    "header": {
                        "numRequiredSignatures": 1,
                        "numReadonlySignedAccounts": 0,
                        "numReadonlyUnsignedAccounts": 1
                    },
                    "accountKeys": self.keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "recentBlockhash": "11111111111111111111111111111111",
                    "instructions": self.instructions
                }
            },
            "meta": {
                "err": err,
                "status": status,
                "fee": 5000,
                "preBalances": [],
                "postBalances": [],
                "innerInstructions": self.inner,
                "logMessages": []
            }
        })
    }
}

fn compiled(program_index: u8, accounts: &[u8], data: &[u8]) -> Value {
    json!({
        "programIdIndex": program_index,
        "accounts": accounts,
        "data": bs58::encode(data).into_string(),
        "stackHeight": null
    })
}

/// Mounts `getSlot`, one signature page (newest first) and every transaction body.
///
/// A request paging past the last signature gets an empty page.
pub async fn mount_chain(server: &MockServer, head: u64, txs: &[MockTx]) {
    Mock::given(method("POST"))
        .and(body_string_contains("getVersion"))
        .respond_with(rpc_result(json!({ "solana-core": "2.1.0", "feature-set": 0 })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(body_string_contains("getSlot"))
        .respond_with(rpc_result(json!(head)))
        .mount(server)
        .await;

    let page: Vec<Value> = txs.iter().map(MockTx::status_json).collect();
    Mock::given(method("POST"))
        .and(body_string_contains("getSignaturesForAddress"))
        .respond_with(rpc_result(Value::Array(page)))
        .mount(server)
        .await;

    if let Some(last) = txs.last() {
        Mock::given(method("POST"))
            .and(body_string_contains("getSignaturesForAddress"))
            .and(body_string_contains(last.signature.as_str()))
            .respond_with(rpc_result(json!([])))
            .with_priority(1)
            .mount(server)
            .await;
    }

    for tx in txs {
        Mock::given(method("POST"))
            .and(body_string_contains("getTransaction"))
            .and(body_string_contains(tx.signature.as_str()))
            .respond_with(rpc_result(tx.transaction_json()))
            .mount(server)
            .await;
    }
}

pub async fn memory_storage() -> Arc<Storage> {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    storage.initialize().await.unwrap();
    Arc::new(storage)
}

pub fn indexer(server: &MockServer, program: Pubkey, storage: Arc<Storage>) -> EvmIndexer {
    let config = IndexerConfigBuilder::new()
        .with_rpc(server.uri())
        .with_database("sqlite::memory:")
        .program_id(program.to_string())
        .with_fetch_concurrency(2)
        .with_retry(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
        .build()
        .unwrap();
    let storage: Arc<dyn StorageBackend> = storage;
    EvmIndexer::new_with_storage(config, storage)
}

// Ethereum side

pub fn secret_key(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).unwrap()
}

pub fn address_for(seed: u8) -> String {
    let public = secret_key(seed).public_key(secp256k1::SECP256K1);
    let digest = keccak256(&public.serialize_uncompressed()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

pub fn unsigned_message(nonce: u64, to: [u8; 20], chain_id: u64) -> Vec<u8> {
    let mut stream = RlpStream::new_list(9);
    stream.append(&nonce);
    stream.append(&1_000_000_000u64);
    stream.append(&21_000u64);
    stream.append(&to.to_vec());
    stream.append(&0u64);
    stream.append(&Vec::<u8>::new());
    stream.append(&chain_id);
    stream.append(&0u8);
    stream.append(&0u8);
    stream.out().to_vec()
}

pub fn sign(unsigned_msg: &[u8], seed: u8) -> Vec<u8> {
    let digest = Message::from_digest(keccak256(unsigned_msg));
    let signature = Secp256k1::sign_ecdsa_recoverable(secp256k1::SECP256K1, &digest, &secret_key(seed));
    let (recovery_id, compact) = signature.serialize_compact();
    let mut out = compact.to_vec();
    out.push(u8::try_from(i32::from(recovery_id)).unwrap());
    out
}

// EVM loader instruction payloads

pub fn call_from_raw(signature: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut data = vec![0x05];
    data.extend_from_slice(&[0u8; 24]);
    data.extend_from_slice(signature);
    data.extend_from_slice(msg);
    data
}

pub fn partial_call(step_count: u64, signature: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut data = vec![0x09];
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&step_count.to_le_bytes());
    data.extend_from_slice(&[0u8; 20]);
    data.extend_from_slice(signature);
    data.extend_from_slice(msg);
    data
}

pub fn write(offset: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0x00, 0, 0, 0];
    data.extend_from_slice(&offset.to_le_bytes());
    data.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    data.extend_from_slice(payload);
    data
}

pub fn continue_step(step_count: u64) -> Vec<u8> {
    let mut data = vec![0x0a];
    data.extend_from_slice(&step_count.to_le_bytes());
    data
}

pub const EXECUTE_FROM_HOLDER: [u8; 1] = [0x0b];
pub const CANCEL: [u8; 1] = [0x0c];

/// Holder account image: `signature || len (u64 LE) || message`.
pub fn holder_image(signature: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut image = signature.to_vec();
    image.extend_from_slice(&(msg.len() as u64).to_le_bytes());
    image.extend_from_slice(msg);
    image
}

pub fn return_marker(status: u8, gas_used: u64, value: &[u8]) -> Vec<u8> {
    let mut data = vec![0x06, status];
    data.extend_from_slice(&gas_used.to_le_bytes());
    data.extend_from_slice(value);
    data
}

pub fn event_marker(address: [u8; 20], topics: &[[u8; 32]], payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0x07];
    data.extend_from_slice(&address);
    data.extend_from_slice(&(topics.len() as u64).to_le_bytes());
    for topic in topics {
        data.extend_from_slice(topic);
    }
    data.extend_from_slice(payload);
    data
}
