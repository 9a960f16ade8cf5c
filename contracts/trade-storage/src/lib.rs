#![no_std]

//! # Trade Storage Contract
//!
//! Owns every persisted record of the trading venue: open positions, pending
//! limit orders, the per-trader closed-trade log, and the three price-bucket
//! index families the executor sweeps scan.
//!
//! ## Key Features
//! - **Position / Order CRUD**: monotonic id assignment (starting at 1, id 0
//!   means "absent"), per-trader id lists kept in lockstep with the primary
//!   maps
//! - **Bucket Indices**: `SLTP(0)`, `LIMIT(1)`, `LIQ(2)` families keyed by
//!   `(asset_index, bucket_id)`, swap-pop removal
//! - **Closed-Trade Log**: append-only history per trader
//! - **Lifecycle Events**: every successful mutation publishes an event
//!
//! ## Access Control
//! All mutating entry points are restricted to the single `core` principal
//! (the trading engine) registered at initialization. Reads are unrestricted.
//!
//! ## Usage
//! - The trading engine calls `store_*` / `remove_*` / bucket operations
//! - Sweep code reads buckets via `get_bucket` (returns a snapshot) and
//!   re-checks entity liveness via `get_open_by_id` / `get_order_by_id`

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, panic_with_error, Address,
    Env, Vec,
};

/// Bucket family holding stop-loss and take-profit targets.
pub const BUCKET_KIND_SLTP: u32 = 0;
/// Bucket family holding pending limit orders.
pub const BUCKET_KIND_LIMIT: u32 = 1;
/// Bucket family holding liquidation targets.
pub const BUCKET_KIND_LIQ: u32 = 2;

/// Target selector for `update_position_target`: stop-loss.
pub const TARGET_KIND_STOP_LOSS: u32 = 0;
/// Target selector for `update_position_target`: take-profit.
pub const TARGET_KIND_TAKE_PROFIT: u32 = 1;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StorageError {
    NotAuthorized = 1,
    AlreadyInitialized = 2,
    InvalidBucketType = 3,
    InvalidTargetType = 4,
    PositionNotFound = 5,
    EntryNotFound = 6,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct OpenPosition {
    pub id: u64,
    pub trader: Address,
    pub asset_index: u32,
    pub is_long: bool,
    pub leverage: u32,
    pub open_price: u128,
    pub size_usd: u128,
    pub timestamp: u64,
    pub sl_bucket_id: u128,
    pub tp_bucket_id: u128,
    pub liq_bucket_id: u128,
    pub stop_loss_price: u128,
    pub take_profit_price: u128,
    pub liquidation_price: u128,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct LimitOrder {
    pub id: u64,
    pub trader: Address,
    pub asset_index: u32,
    pub is_long: bool,
    pub leverage: u32,
    pub order_price: u128,
    pub size_usd: u128,
    pub timestamp: u64,
    pub stop_loss: u128,
    pub take_profit: u128,
    pub limit_bucket_id: u128,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct ClosedTrade {
    pub asset_index: u32,
    pub is_long: bool,
    pub leverage: u32,
    pub open_price: u128,
    pub close_price: u128,
    pub size_usd: u128,
    pub open_ts: u64,
    pub close_ts: u64,
    pub pnl: i128,
}

/// One record inside a price bucket. `target_price` is the exact trigger
/// level; the bucket id it lives under is `target_price / bucket_size`.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct BucketEntry {
    pub id: u64,
    pub target_price: u128,
}

// Events

#[contractevent]
pub struct OpenStored {
    pub id: u64,
    pub trader: Address,
    pub asset_index: u32,
    pub is_long: bool,
    pub size_usd: u128,
}

#[contractevent]
pub struct OrderStored {
    pub id: u64,
    pub trader: Address,
    pub asset_index: u32,
    pub is_long: bool,
    pub size_usd: u128,
}

#[contractevent]
pub struct OpenRemoved {
    pub id: u64,
    pub trader: Address,
}

#[contractevent]
pub struct OrderRemoved {
    pub id: u64,
    pub trader: Address,
}

#[contractevent]
pub struct ClosedStored {
    pub trader: Address,
    pub asset_index: u32,
    pub close_ts: u64,
    pub pnl: i128,
}

#[contractevent]
pub struct BucketUpdated {
    pub kind: u32,
    pub asset_index: u32,
    pub bucket_id: u128,
    pub id: u64,
    pub target_price: u128,
}

#[derive(Clone)]
#[contracttype]
pub enum DataKey {
    Core,
    NextOpenId,
    NextOrderId,
    Open(u64),
    Order(u64),
    UserOpenIds(Address),
    UserOrderIds(Address),
    UserCloseds(Address),
    SlTpBucket(u32, u128),
    LimitBucket(u32, u128),
    LiqBucket(u32, u128),
}

// Helper functions for storage access

fn get_core(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Core)
        .unwrap_or_else(|| panic_with_error!(env, StorageError::NotAuthorized))
}

/// Restrict a mutating entry point to the registered core principal.
fn require_core(env: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_core(env) {
        panic_with_error!(env, StorageError::NotAuthorized);
    }
}

fn bucket_key(env: &Env, kind: u32, asset_index: u32, bucket_id: u128) -> DataKey {
    match kind {
        BUCKET_KIND_SLTP => DataKey::SlTpBucket(asset_index, bucket_id),
        BUCKET_KIND_LIMIT => DataKey::LimitBucket(asset_index, bucket_id),
        BUCKET_KIND_LIQ => DataKey::LiqBucket(asset_index, bucket_id),
        _ => panic_with_error!(env, StorageError::InvalidBucketType),
    }
}

fn get_bucket_entries(env: &Env, key: &DataKey) -> Vec<BucketEntry> {
    env.storage()
        .persistent()
        .get(key)
        .unwrap_or(Vec::new(env))
}

fn put_bucket_entries(env: &Env, key: &DataKey, entries: &Vec<BucketEntry>) {
    if entries.is_empty() {
        env.storage().persistent().remove(key);
    } else {
        env.storage().persistent().set(key, entries);
    }
}

fn next_open_id(env: &Env) -> u64 {
    let id: u64 = env
        .storage()
        .instance()
        .get(&DataKey::NextOpenId)
        .unwrap_or(1);
    env.storage().instance().set(&DataKey::NextOpenId, &(id + 1));
    id
}

fn next_order_id(env: &Env) -> u64 {
    let id: u64 = env
        .storage()
        .instance()
        .get(&DataKey::NextOrderId)
        .unwrap_or(1);
    env.storage()
        .instance()
        .set(&DataKey::NextOrderId, &(id + 1));
    id
}

fn get_id_list(env: &Env, key: &DataKey) -> Vec<u64> {
    env.storage()
        .persistent()
        .get(key)
        .unwrap_or(Vec::new(env))
}

fn push_id(env: &Env, key: &DataKey, id: u64) {
    let mut list = get_id_list(env, key);
    list.push_back(id);
    env.storage().persistent().set(key, &list);
}

/// Swap-pop `id` out of the list. Returns false when the id is absent.
fn swap_pop_id(env: &Env, key: &DataKey, id: u64) -> bool {
    let mut list = get_id_list(env, key);
    for i in 0..list.len() {
        if list.get_unchecked(i) == id {
            let last = list.len() - 1;
            if i != last {
                let tail = list.get_unchecked(last);
                list.set(i, tail);
            }
            list.pop_back();
            env.storage().persistent().set(key, &list);
            return true;
        }
    }
    false
}

/// Swap-pop the first entry matching `id` out of a bucket. Returns the
/// removed entry, or None when no entry matches.
fn swap_pop_entry(env: &Env, key: &DataKey, id: u64) -> Option<BucketEntry> {
    let mut entries = get_bucket_entries(env, key);
    for i in 0..entries.len() {
        let entry = entries.get_unchecked(i);
        if entry.id == id {
            let last = entries.len() - 1;
            if i != last {
                let tail = entries.get_unchecked(last);
                entries.set(i, tail);
            }
            entries.pop_back();
            put_bucket_entries(env, key, &entries);
            return Some(entry);
        }
    }
    None
}

#[contract]
pub struct TradeStorage;

#[contractimpl]
impl TradeStorage {
    /// Initialize the storage contract with the core principal.
    ///
    /// # Arguments
    ///
    /// * `core` - The trading engine contract address; the only principal
    ///   allowed to mutate state
    ///
    /// # Panics
    ///
    /// Panics if already initialized
    pub fn initialize(env: Env, core: Address) {
        if env.storage().instance().has(&DataKey::Core) {
            panic_with_error!(&env, StorageError::AlreadyInitialized);
        }
        env.storage().instance().set(&DataKey::Core, &core);
    }

    /// Get the registered core principal.
    pub fn core(env: Env) -> Address {
        get_core(&env)
    }

    /// Store a new open position, assigning the next open id.
    ///
    /// The `id` field of the passed struct is ignored and overwritten.
    ///
    /// # Arguments
    ///
    /// * `core` - The core principal (must authorize)
    /// * `open` - The position fields to persist
    ///
    /// # Returns
    ///
    /// The assigned position id
    pub fn store_open(env: Env, core: Address, open: OpenPosition) -> u64 {
        require_core(&env, &core);

        let id = next_open_id(&env);
        let mut open = open;
        open.id = id;

        env.storage().persistent().set(&DataKey::Open(id), &open);
        push_id(&env, &DataKey::UserOpenIds(open.trader.clone()), id);

        OpenStored {
            id,
            trader: open.trader.clone(),
            asset_index: open.asset_index,
            is_long: open.is_long,
            size_usd: open.size_usd,
        }
        .publish(&env);

        id
    }

    /// Store a new limit order, assigning the next order id.
    ///
    /// The `id` field of the passed struct is ignored and overwritten.
    ///
    /// # Arguments
    ///
    /// * `core` - The core principal (must authorize)
    /// * `order` - The order fields to persist
    ///
    /// # Returns
    ///
    /// The assigned order id
    pub fn store_order(env: Env, core: Address, order: LimitOrder) -> u64 {
        require_core(&env, &core);

        let id = next_order_id(&env);
        let mut order = order;
        order.id = id;

        env.storage().persistent().set(&DataKey::Order(id), &order);
        push_id(&env, &DataKey::UserOrderIds(order.trader.clone()), id);

        OrderStored {
            id,
            trader: order.trader.clone(),
            asset_index: order.asset_index,
            is_long: order.is_long,
            size_usd: order.size_usd,
        }
        .publish(&env);

        id
    }

    /// Erase a position and drop its id from the trader's list.
    ///
    /// A no-op when the id is absent; callers that depend on existence must
    /// check via `get_open_by_id` first.
    pub fn remove_open(env: Env, core: Address, trader: Address, id: u64) {
        require_core(&env, &core);

        if !env.storage().persistent().has(&DataKey::Open(id)) {
            return;
        }
        env.storage().persistent().remove(&DataKey::Open(id));
        swap_pop_id(&env, &DataKey::UserOpenIds(trader.clone()), id);

        OpenRemoved { id, trader }.publish(&env);
    }

    /// Erase an order and drop its id from the trader's list.
    ///
    /// A no-op when the id is absent.
    pub fn remove_order(env: Env, core: Address, trader: Address, id: u64) {
        require_core(&env, &core);

        if !env.storage().persistent().has(&DataKey::Order(id)) {
            return;
        }
        env.storage().persistent().remove(&DataKey::Order(id));
        swap_pop_id(&env, &DataKey::UserOrderIds(trader.clone()), id);

        OrderRemoved { id, trader }.publish(&env);
    }

    /// Append a record to a trader's closed-trade log.
    pub fn store_closed(env: Env, core: Address, trader: Address, closed: ClosedTrade) {
        require_core(&env, &core);

        let key = DataKey::UserCloseds(trader.clone());
        let mut log: Vec<ClosedTrade> = env
            .storage()
            .persistent()
            .get(&key)
            .unwrap_or(Vec::new(&env));
        log.push_back(closed.clone());
        env.storage().persistent().set(&key, &log);

        ClosedStored {
            trader,
            asset_index: closed.asset_index,
            close_ts: closed.close_ts,
            pnl: closed.pnl,
        }
        .publish(&env);
    }

    /// Insert an entry into a bucket.
    ///
    /// # Arguments
    ///
    /// * `core` - The core principal (must authorize)
    /// * `kind` - Bucket family: `SLTP(0)`, `LIMIT(1)` or `LIQ(2)`
    /// * `asset_index` - The listed asset the bucket belongs to
    /// * `bucket_id` - Quantized price, `target_price / bucket_size`
    /// * `id` - Position or order id
    /// * `target_price` - Exact trigger level
    ///
    /// # Panics
    ///
    /// Panics with `InvalidBucketType` on an unknown kind
    pub fn add_to_bucket(
        env: Env,
        core: Address,
        kind: u32,
        asset_index: u32,
        bucket_id: u128,
        id: u64,
        target_price: u128,
    ) {
        require_core(&env, &core);

        let key = bucket_key(&env, kind, asset_index, bucket_id);
        let mut entries = get_bucket_entries(&env, &key);
        entries.push_back(BucketEntry { id, target_price });
        put_bucket_entries(&env, &key, &entries);

        BucketUpdated {
            kind,
            asset_index,
            bucket_id,
            id,
            target_price,
        }
        .publish(&env);
    }

    /// Remove the first entry matching `id` from a bucket (swap-pop).
    ///
    /// # Panics
    ///
    /// Panics with `InvalidBucketType` on an unknown kind and with
    /// `EntryNotFound` when no entry matches
    pub fn remove_from_bucket(
        env: Env,
        core: Address,
        kind: u32,
        asset_index: u32,
        bucket_id: u128,
        id: u64,
    ) {
        require_core(&env, &core);

        let key = bucket_key(&env, kind, asset_index, bucket_id);
        if swap_pop_entry(&env, &key, id).is_none() {
            panic_with_error!(&env, StorageError::EntryNotFound);
        }

        BucketUpdated {
            kind,
            asset_index,
            bucket_id,
            id,
            target_price: 0,
        }
        .publish(&env);
    }

    /// Move a position's stop-loss or take-profit to a new level.
    ///
    /// Removes the old SLTP bucket entry (when one was registered), inserts
    /// the new one, and patches both the bucket id and the stored trigger
    /// price on the position in a single write.
    ///
    /// # Arguments
    ///
    /// * `core` - The core principal (must authorize)
    /// * `id` - The position id
    /// * `kind` - `SL(0)` or `TP(1)`
    /// * `new_bucket_id` - `new_target_price / bucket_size`
    /// * `new_target_price` - The new trigger level (non-zero)
    ///
    /// # Panics
    ///
    /// Panics with `InvalidTargetType` on an unknown kind and with
    /// `PositionNotFound` when the position does not exist
    pub fn update_position_target(
        env: Env,
        core: Address,
        id: u64,
        kind: u32,
        new_bucket_id: u128,
        new_target_price: u128,
    ) {
        require_core(&env, &core);

        if kind != TARGET_KIND_STOP_LOSS && kind != TARGET_KIND_TAKE_PROFIT {
            panic_with_error!(&env, StorageError::InvalidTargetType);
        }

        let mut open: OpenPosition = env
            .storage()
            .persistent()
            .get(&DataKey::Open(id))
            .unwrap_or_else(|| panic_with_error!(&env, StorageError::PositionNotFound));

        let (old_price, old_bucket) = if kind == TARGET_KIND_STOP_LOSS {
            (open.stop_loss_price, open.sl_bucket_id)
        } else {
            (open.take_profit_price, open.tp_bucket_id)
        };

        // A zero old price means the target was never registered in a bucket.
        if old_price > 0 {
            let key = bucket_key(&env, BUCKET_KIND_SLTP, open.asset_index, old_bucket);
            if swap_pop_entry(&env, &key, id).is_none() {
                panic_with_error!(&env, StorageError::EntryNotFound);
            }
        }

        let key = bucket_key(&env, BUCKET_KIND_SLTP, open.asset_index, new_bucket_id);
        let mut entries = get_bucket_entries(&env, &key);
        entries.push_back(BucketEntry {
            id,
            target_price: new_target_price,
        });
        put_bucket_entries(&env, &key, &entries);

        if kind == TARGET_KIND_STOP_LOSS {
            open.sl_bucket_id = new_bucket_id;
            open.stop_loss_price = new_target_price;
        } else {
            open.tp_bucket_id = new_bucket_id;
            open.take_profit_price = new_target_price;
        }
        env.storage().persistent().set(&DataKey::Open(id), &open);

        BucketUpdated {
            kind: BUCKET_KIND_SLTP,
            asset_index: open.asset_index,
            bucket_id: new_bucket_id,
            id,
            target_price: new_target_price,
        }
        .publish(&env);
    }

    /// Get a snapshot of a bucket's entries, safe to iterate independently
    /// of subsequent mutations.
    ///
    /// # Panics
    ///
    /// Panics with `InvalidBucketType` on an unknown kind
    pub fn get_bucket(env: Env, kind: u32, asset_index: u32, bucket_id: u128) -> Vec<BucketEntry> {
        let key = bucket_key(&env, kind, asset_index, bucket_id);
        get_bucket_entries(&env, &key)
    }

    /// Get a position by id. Returns None when the id is absent.
    pub fn get_open_by_id(env: Env, id: u64) -> Option<OpenPosition> {
        env.storage().persistent().get(&DataKey::Open(id))
    }

    /// Get an order by id. Returns None when the id is absent.
    pub fn get_order_by_id(env: Env, id: u64) -> Option<LimitOrder> {
        env.storage().persistent().get(&DataKey::Order(id))
    }

    /// Get the ids of all live positions owned by a trader.
    pub fn get_user_open_ids(env: Env, trader: Address) -> Vec<u64> {
        get_id_list(&env, &DataKey::UserOpenIds(trader))
    }

    /// Get the ids of all live orders owned by a trader.
    pub fn get_user_order_ids(env: Env, trader: Address) -> Vec<u64> {
        get_id_list(&env, &DataKey::UserOrderIds(trader))
    }

    /// Get a trader's closed-trade log.
    pub fn get_user_closeds(env: Env, trader: Address) -> Vec<ClosedTrade> {
        env.storage()
            .persistent()
            .get(&DataKey::UserCloseds(trader))
            .unwrap_or(Vec::new(&env))
    }
}
