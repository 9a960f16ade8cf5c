#![no_std]

//! # Oracle Verifier Contract
//!
//! Verifies executor-submitted price bundles for the trading venue. A bundle
//! ("proof") is a binary blob of fixed-width price records followed by a
//! SHA-256 digest of the record section; `verify` checks the shape and
//! digest, decodes the records, and returns them as typed assertions.
//!
//! ## Proof Layout
//! Each record is 32 bytes, big-endian:
//! `pair_id: u32 | price: u128 | decimals: u32 | timestamp: u64`,
//! and the blob ends with the 32-byte SHA-256 of all records.
//!
//! ## Validation
//! - Length must cover at least one record plus the digest, and the record
//!   section must be a whole number of records
//! - The trailing digest must match the recomputed hash
//! - When a maximum price age is configured, each record's timestamp must be
//!   within that bound of ledger time
//!
//! `decimals` is carried for downstream use; the verifier does not interpret
//! it, and zero prices pass verification (consumers reject them where a
//! price is actually used).

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, panic_with_error, Address, Bytes, Env,
    Vec,
};

const RECORD_LEN: u32 = 32;
const DIGEST_LEN: u32 = 32;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum OracleError {
    AlreadyInitialized = 1,
    NotAuthorized = 2,
    MalformedProof = 3,
    StaleAssertion = 4,
}

/// One verified price statement out of a bundle.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct PriceAssertion {
    pub pair_id: u32,
    pub price: u128,
    pub decimals: u32,
    pub timestamp: u64,
}

#[derive(Clone)]
#[contracttype]
pub enum DataKey {
    Admin,
    MaxPriceAge,
}

fn get_admin(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .unwrap_or_else(|| panic_with_error!(env, OracleError::NotAuthorized))
}

fn require_admin(env: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_admin(env) {
        panic_with_error!(env, OracleError::NotAuthorized);
    }
}

fn get_max_price_age(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::MaxPriceAge)
        .unwrap_or(0)
}

fn read_u32(payload: &Bytes, at: u32) -> u32 {
    let mut v = 0u32;
    for i in 0..4 {
        v = (v << 8) | payload.get_unchecked(at + i) as u32;
    }
    v
}

fn read_u64(payload: &Bytes, at: u32) -> u64 {
    let mut v = 0u64;
    for i in 0..8 {
        v = (v << 8) | payload.get_unchecked(at + i) as u64;
    }
    v
}

fn read_u128(payload: &Bytes, at: u32) -> u128 {
    let mut v = 0u128;
    for i in 0..16 {
        v = (v << 8) | payload.get_unchecked(at + i) as u128;
    }
    v
}

#[contract]
pub struct OracleVerifier;

#[contractimpl]
impl OracleVerifier {
    /// Initialize the verifier with an admin.
    ///
    /// # Panics
    ///
    /// Panics if already initialized
    pub fn initialize(env: Env, admin: Address) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic_with_error!(&env, OracleError::AlreadyInitialized);
        }
        env.storage().instance().set(&DataKey::Admin, &admin);
    }

    /// Set the maximum accepted age of a price record in seconds.
    /// Zero disables the staleness check.
    ///
    /// # Arguments
    ///
    /// * `admin` - The administrator address (must authorize)
    /// * `max_age` - Maximum `now - timestamp` per record, in seconds
    pub fn set_max_price_age(env: Env, admin: Address, max_age: u64) {
        require_admin(&env, &admin);
        env.storage()
            .instance()
            .set(&DataKey::MaxPriceAge, &max_age);
    }

    /// Get the configured maximum price age.
    pub fn max_price_age(env: Env) -> u64 {
        get_max_price_age(&env)
    }

    /// Verify a price bundle and decode its assertions.
    ///
    /// # Arguments
    ///
    /// * `proof` - The binary bundle (records followed by SHA-256 digest)
    ///
    /// # Returns
    ///
    /// The decoded assertions, in record order
    ///
    /// # Panics
    ///
    /// Panics with `MalformedProof` when the blob is too short, the record
    /// section is not a whole number of records, or the digest mismatches;
    /// with `StaleAssertion` when a record exceeds the configured age
    pub fn verify(env: Env, proof: Bytes) -> Vec<PriceAssertion> {
        let total = proof.len();
        if total < RECORD_LEN + DIGEST_LEN {
            panic_with_error!(&env, OracleError::MalformedProof);
        }

        let payload_len = total - DIGEST_LEN;
        if payload_len % RECORD_LEN != 0 {
            panic_with_error!(&env, OracleError::MalformedProof);
        }

        let payload = proof.slice(0..payload_len);
        let digest = env.crypto().sha256(&payload);
        let expected = Bytes::from_array(&env, &digest.to_array());
        if proof.slice(payload_len..total) != expected {
            panic_with_error!(&env, OracleError::MalformedProof);
        }

        let max_age = get_max_price_age(&env);
        let now = env.ledger().timestamp();

        let mut assertions = Vec::new(&env);
        let mut at = 0;
        while at < payload_len {
            let pair_id = read_u32(&payload, at);
            let price = read_u128(&payload, at + 4);
            let decimals = read_u32(&payload, at + 20);
            let timestamp = read_u64(&payload, at + 24);

            if max_age > 0 && now.saturating_sub(timestamp) > max_age {
                panic_with_error!(&env, OracleError::StaleAssertion);
            }

            assertions.push_back(PriceAssertion {
                pair_id,
                price,
                decimals,
                timestamp,
            });
            at += RECORD_LEN;
        }

        assertions
    }
}
