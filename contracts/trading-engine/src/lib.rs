#![no_std]

//! # Trading Engine Contract
//!
//! Execution core of the leveraged perpetual-futures venue. Validates trader
//! intents, computes liquidation prices and PnL, drives the position/order
//! state machine, and runs the executor sweeps that fill limit orders, close
//! touched stop-loss/take-profit targets, and liquidate underwater positions
//! against verified oracle price bundles.
//!
//! ## Key Features
//! - **Trader Operations**: open/close positions, place/cancel limit orders,
//!   move stop-loss and take-profit levels
//! - **Executor Sweeps**: one oracle bundle per call; every bucket within ±1
//!   of the quantized price is scanned and all touched entries finalized
//! - **Margin Settlement**: all monetary effects route through the margin
//!   vault; `close_margin = size ± pnl`, clamped at zero on underflow
//! - **Asset Registry**: per-asset bucket size and market class, per-class
//!   trading halts, informational funding rate and spread
//!
//! ## Collaborators
//! The engine is the only principal allowed to write to the trade-storage
//! contract and to settle margin in the vault. Oracle bundles are verified
//! by the oracle-verifier contract; the engine consumes the decoded
//! assertions and looks prices up by `pair_id == asset_index`.
//!
//! ## State Machine
//! ```text
//! Order: Placed --fill--> (Open.Live)        --cancel--> Gone
//! Open:  Live  --trader_close | SL | TP | LIQ--> Closed (terminal)
//! ```
//! Only the first observed trigger finalizes an entity; later triggers see a
//! dead id and skip. Storage and index mutations precede vault settlement in
//! every finalizer, and any mid-sweep failure rolls the whole call back.

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, panic_with_error, Address, Bytes, Env,
    U256, Vec,
};

use margin_vault::MarginVaultClient;
use oracle_verifier::{OracleVerifierClient, PriceAssertion};
use trade_storage::{
    ClosedTrade, LimitOrder, OpenPosition, TradeStorageClient, BUCKET_KIND_LIMIT, BUCKET_KIND_LIQ,
    BUCKET_KIND_SLTP, TARGET_KIND_STOP_LOSS, TARGET_KIND_TAKE_PROFIT,
};

/// Minimum margin per position or order: 10 units of the six-decimal token.
pub const MIN_SIZE_USD: u128 = 10_000_000;
pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 100;
/// Default trigger tolerance: 10/10_000 = 0.1% of the oracle price.
pub const DEFAULT_PRICE_TOLERANCE: u32 = 10;
/// Tolerance cap: 100/10_000 = 1%.
pub const MAX_PRICE_TOLERANCE: u32 = 100;
pub const MAX_FUNDING_RATE: u32 = 1_000;
pub const MAX_SPREAD: u32 = 1_000;
/// Asset classes 0..4 partition assets for per-class trading halts.
pub const ASSET_TYPE_COUNT: u32 = 4;

const BPS_DIVISOR: u128 = 10_000;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum EngineError {
    NotAuthorized = 1,
    AlreadyInitialized = 2,
    AssetNotListed = 3,
    AssetAlreadyListed = 4,
    InvalidAssetType = 5,
    InvalidBucketSize = 6,
    MarketClosed = 7,
    InvalidLeverage = 8,
    MinSize = 9,
    InvalidSLTP = 10,
    PriceNotInProof = 11,
    PriceZero = 12,
    PositionNotFound = 13,
    NotPositionOwner = 14,
    PositionAlreadyClosed = 15,
    OrderNotFound = 16,
    NotOrderOwner = 17,
    InvalidTargetType = 18,
    ToleranceTooHigh = 19,
    RateTooHigh = 20,
    SpreadTooHigh = 21,
}

/// Immutable listing record for a tradable asset. `bucket_size` is the
/// price-quantization granule; `asset_type` selects the market-open class.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct AssetInfo {
    pub bucket_size: u128,
    pub asset_type: u32,
}

#[derive(Clone)]
#[contracttype]
pub enum DataKey {
    Admin,
    Executor,
    Storage,
    Vault,
    Oracle,
    PriceTolerance,
    Asset(u32),
    MarketOpen(u32),
    FundingRate(u32),
    Spread(u32),
}

// Helper functions for storage access and authorization

fn get_admin(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .unwrap_or_else(|| panic_with_error!(env, EngineError::NotAuthorized))
}

fn get_executor(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Executor)
        .unwrap_or_else(|| panic_with_error!(env, EngineError::NotAuthorized))
}

fn require_admin(env: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_admin(env) {
        panic_with_error!(env, EngineError::NotAuthorized);
    }
}

fn require_executor(env: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_executor(env) {
        panic_with_error!(env, EngineError::NotAuthorized);
    }
}

fn require_admin_or_executor(env: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_admin(env) && caller != &get_executor(env) {
        panic_with_error!(env, EngineError::NotAuthorized);
    }
}

fn get_storage_addr(env: &Env) -> Address {
    env.storage().instance().get(&DataKey::Storage).unwrap()
}

fn get_vault_addr(env: &Env) -> Address {
    env.storage().instance().get(&DataKey::Vault).unwrap()
}

fn get_oracle_addr(env: &Env) -> Address {
    env.storage().instance().get(&DataKey::Oracle).unwrap()
}

fn asset_info(env: &Env, asset_index: u32) -> Option<AssetInfo> {
    env.storage().instance().get(&DataKey::Asset(asset_index))
}

fn require_listed(env: &Env, asset_index: u32) -> AssetInfo {
    asset_info(env, asset_index)
        .unwrap_or_else(|| panic_with_error!(env, EngineError::AssetNotListed))
}

fn is_market_open(env: &Env, asset_type: u32) -> bool {
    env.storage()
        .instance()
        .get(&DataKey::MarketOpen(asset_type))
        .unwrap_or(false)
}

fn get_tolerance(env: &Env) -> u32 {
    env.storage()
        .instance()
        .get(&DataKey::PriceTolerance)
        .unwrap_or(DEFAULT_PRICE_TOLERANCE)
}

/// Look up the price asserted for `asset_index` in a verified bundle.
fn price_from_proof(env: &Env, assertions: &Vec<PriceAssertion>, asset_index: u32) -> u128 {
    for assertion in assertions.iter() {
        if assertion.pair_id == asset_index {
            if assertion.price == 0 {
                panic_with_error!(env, EngineError::PriceZero);
            }
            return assertion.price;
        }
    }
    panic_with_error!(env, EngineError::PriceNotInProof)
}

/// Price at which a position's leveraged loss consumes its margin, computed
/// once at open from the `1/lev` adverse move.
fn liquidation_price(open_price: u128, leverage: u32, is_long: bool) -> u128 {
    let lev = leverage as u128;
    if is_long {
        open_price * lev / (lev + 1)
    } else {
        open_price * (lev + 1) / lev
    }
}

/// Close-margin and PnL for a position finalized at `close_price`.
///
/// The `(diff * size * lev) / open_price` product is taken through 256-bit
/// arithmetic; the margin clamps at zero on a total loss and the recorded
/// PnL always equals `close_margin - size_usd`.
fn settle_amounts(
    env: &Env,
    open_price: u128,
    close_price: u128,
    size_usd: u128,
    leverage: u32,
    is_long: bool,
) -> (u128, i128) {
    let gain = if is_long {
        close_price >= open_price
    } else {
        open_price >= close_price
    };
    let diff = if close_price >= open_price {
        close_price - open_price
    } else {
        open_price - close_price
    };

    let magnitude = U256::from_u128(env, diff)
        .mul(&U256::from_u128(env, size_usd))
        .mul(&U256::from_u128(env, leverage as u128))
        .div(&U256::from_u128(env, open_price));
    let magnitude = magnitude.to_u128().unwrap_or(u128::MAX);

    let close_margin = if gain {
        size_usd.saturating_add(magnitude)
    } else {
        size_usd.saturating_sub(magnitude)
    };

    let close_margin_i = i128::try_from(close_margin).unwrap_or(i128::MAX);
    let size_i = i128::try_from(size_usd).unwrap_or(i128::MAX);
    (close_margin, close_margin_i - size_i)
}

/// Trigger acceptance: `|price - target| * 10_000 <= price * tolerance`.
fn within_tolerance(env: &Env, price: u128, target: u128) -> bool {
    let diff = if price >= target {
        price - target
    } else {
        target - price
    };
    diff * BPS_DIVISOR <= price * get_tolerance(env) as u128
}

/// Stop-loss/take-profit geometry at open time, against the entry price.
fn validate_open_targets(
    env: &Env,
    is_long: bool,
    price: u128,
    liq_price: u128,
    sl_price: u128,
    tp_price: u128,
) {
    if is_long {
        if sl_price > 0 && (sl_price < liq_price || sl_price > price) {
            panic_with_error!(env, EngineError::InvalidSLTP);
        }
        if tp_price > 0 && tp_price <= price {
            panic_with_error!(env, EngineError::InvalidSLTP);
        }
    } else {
        if sl_price > 0 && (sl_price < price || sl_price > liq_price) {
            panic_with_error!(env, EngineError::InvalidSLTP);
        }
        if tp_price > 0 && tp_price >= price {
            panic_with_error!(env, EngineError::InvalidSLTP);
        }
    }
}

/// The ±1 bucket scan window. The lower neighbour is absent at bucket zero.
fn neighbourhood(center: u128) -> [Option<u128>; 3] {
    [center.checked_sub(1), Some(center), center.checked_add(1)]
}

/// Register a freshly stored position in its liquidation bucket and, where
/// a trigger is set, in the SLTP buckets.
fn register_position_buckets(env: &Env, storage: &TradeStorageClient, id: u64, open: &OpenPosition) {
    let this = env.current_contract_address();
    storage.add_to_bucket(
        &this,
        &BUCKET_KIND_LIQ,
        &open.asset_index,
        &open.liq_bucket_id,
        &id,
        &open.liquidation_price,
    );
    if open.stop_loss_price > 0 {
        storage.add_to_bucket(
            &this,
            &BUCKET_KIND_SLTP,
            &open.asset_index,
            &open.sl_bucket_id,
            &id,
            &open.stop_loss_price,
        );
    }
    if open.take_profit_price > 0 {
        storage.add_to_bucket(
            &this,
            &BUCKET_KIND_SLTP,
            &open.asset_index,
            &open.tp_bucket_id,
            &id,
            &open.take_profit_price,
        );
    }
}

/// Finalize a live position: drop every bucket membership, erase the
/// position, append the closed-trade record, then settle margin with the
/// vault. Settlement is attributed to the stored trader, never the caller.
fn finalize_close(env: &Env, open: &OpenPosition, close_price: u128, close_margin: u128, pnl: i128) {
    let this = env.current_contract_address();
    let storage = TradeStorageClient::new(env, &get_storage_addr(env));

    storage.remove_from_bucket(
        &this,
        &BUCKET_KIND_LIQ,
        &open.asset_index,
        &open.liq_bucket_id,
        &open.id,
    );
    if open.stop_loss_price > 0 {
        storage.remove_from_bucket(
            &this,
            &BUCKET_KIND_SLTP,
            &open.asset_index,
            &open.sl_bucket_id,
            &open.id,
        );
    }
    if open.take_profit_price > 0 {
        storage.remove_from_bucket(
            &this,
            &BUCKET_KIND_SLTP,
            &open.asset_index,
            &open.tp_bucket_id,
            &open.id,
        );
    }
    storage.remove_open(&this, &open.trader, &open.id);
    storage.store_closed(
        &this,
        &open.trader,
        &ClosedTrade {
            asset_index: open.asset_index,
            is_long: open.is_long,
            leverage: open.leverage,
            open_price: open.open_price,
            close_price,
            size_usd: open.size_usd,
            open_ts: open.timestamp,
            close_ts: env.ledger().timestamp(),
            pnl,
        },
    );

    let vault = MarginVaultClient::new(env, &get_vault_addr(env));
    vault.settle_margin(&this, &open.trader, &open.size_usd, &close_margin);
}

/// Promote a touched limit order into a live position at the order price
/// (not the oracle price), then retire the order.
fn promote_order(env: &Env, storage: &TradeStorageClient, order: &LimitOrder, info: &AssetInfo) {
    let this = env.current_contract_address();

    let liq_price = liquidation_price(order.order_price, order.leverage, order.is_long);
    let open = OpenPosition {
        id: 0,
        trader: order.trader.clone(),
        asset_index: order.asset_index,
        is_long: order.is_long,
        leverage: order.leverage,
        open_price: order.order_price,
        size_usd: order.size_usd,
        timestamp: env.ledger().timestamp(),
        sl_bucket_id: order.stop_loss / info.bucket_size,
        tp_bucket_id: order.take_profit / info.bucket_size,
        liq_bucket_id: liq_price / info.bucket_size,
        stop_loss_price: order.stop_loss,
        take_profit_price: order.take_profit,
        liquidation_price: liq_price,
    };

    let id = storage.store_open(&this, &open);
    register_position_buckets(env, storage, id, &open);

    storage.remove_from_bucket(
        &this,
        &BUCKET_KIND_LIMIT,
        &order.asset_index,
        &order.limit_bucket_id,
        &order.id,
    );
    storage.remove_order(&this, &order.trader, &order.id);
}

#[contract]
pub struct TradingEngine;

#[contractimpl]
impl TradingEngine {
    /// Initialize the engine with its principals and collaborators.
    ///
    /// # Arguments
    ///
    /// * `admin` - The administrator address (must authorize)
    /// * `executor` - The privileged sweep principal
    /// * `storage` - The trade-storage contract address
    /// * `vault` - The margin-vault contract address
    /// * `oracle` - The oracle-verifier contract address
    ///
    /// # Panics
    ///
    /// Panics if already initialized
    pub fn initialize(
        env: Env,
        admin: Address,
        executor: Address,
        storage: Address,
        vault: Address,
        oracle: Address,
    ) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic_with_error!(&env, EngineError::AlreadyInitialized);
        }

        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Executor, &executor);
        env.storage().instance().set(&DataKey::Storage, &storage);
        env.storage().instance().set(&DataKey::Vault, &vault);
        env.storage().instance().set(&DataKey::Oracle, &oracle);
        env.storage()
            .instance()
            .set(&DataKey::PriceTolerance, &DEFAULT_PRICE_TOLERANCE);
    }

    /// Register a tradable asset. Immutable after listing.
    ///
    /// # Arguments
    ///
    /// * `caller` - Admin or executor (must authorize)
    /// * `asset_index` - The asset identifier, matching the oracle `pair_id`
    /// * `bucket_size` - The price-quantization granule (non-zero)
    /// * `asset_type` - The market-open class, `0..4`
    pub fn list_asset(env: Env, caller: Address, asset_index: u32, bucket_size: u128, asset_type: u32) {
        require_admin_or_executor(&env, &caller);

        if bucket_size == 0 {
            panic_with_error!(&env, EngineError::InvalidBucketSize);
        }
        if asset_type >= ASSET_TYPE_COUNT {
            panic_with_error!(&env, EngineError::InvalidAssetType);
        }
        if asset_info(&env, asset_index).is_some() {
            panic_with_error!(&env, EngineError::AssetAlreadyListed);
        }

        env.storage().instance().set(
            &DataKey::Asset(asset_index),
            &AssetInfo {
                bucket_size,
                asset_type,
            },
        );
    }

    /// Open or halt trading for an entire asset class.
    pub fn set_market_open(env: Env, admin: Address, asset_type: u32, open: bool) {
        require_admin(&env, &admin);
        if asset_type >= ASSET_TYPE_COUNT {
            panic_with_error!(&env, EngineError::InvalidAssetType);
        }
        env.storage()
            .instance()
            .set(&DataKey::MarketOpen(asset_type), &open);
    }

    /// Store the informational funding rate for an asset. The engine never
    /// applies it; it is view-only metadata for off-engine consumers.
    pub fn set_funding_rate(env: Env, executor: Address, asset_index: u32, rate: u32) {
        require_executor(&env, &executor);
        require_listed(&env, asset_index);
        if rate > MAX_FUNDING_RATE {
            panic_with_error!(&env, EngineError::RateTooHigh);
        }
        env.storage()
            .instance()
            .set(&DataKey::FundingRate(asset_index), &rate);
    }

    /// Store the informational spread for an asset. View-only metadata.
    pub fn set_spread(env: Env, executor: Address, asset_index: u32, spread: u32) {
        require_executor(&env, &executor);
        require_listed(&env, asset_index);
        if spread > MAX_SPREAD {
            panic_with_error!(&env, EngineError::SpreadTooHigh);
        }
        env.storage()
            .instance()
            .set(&DataKey::Spread(asset_index), &spread);
    }

    /// Set the trigger tolerance in units of 1/10_000 of price.
    ///
    /// # Panics
    ///
    /// Panics with `ToleranceTooHigh` above 100 (1%)
    pub fn set_tolerance(env: Env, executor: Address, tolerance: u32) {
        require_executor(&env, &executor);
        if tolerance > MAX_PRICE_TOLERANCE {
            panic_with_error!(&env, EngineError::ToleranceTooHigh);
        }
        env.storage()
            .instance()
            .set(&DataKey::PriceTolerance, &tolerance);
    }

    /// Open a leveraged position at the oracle price in `proof`.
    ///
    /// # Arguments
    ///
    /// * `trader` - The position owner (must authorize; margin is pulled
    ///   from this address)
    /// * `asset_index` - A listed asset whose market class is open
    /// * `proof` - Oracle bundle carrying the asset's price
    /// * `is_long` - Position direction
    /// * `leverage` - Multiplier in `[1, 100]`
    /// * `size_usd` - Margin to deposit, at least `MIN_SIZE_USD`
    /// * `sl_price` - Optional stop-loss (0 = none); for longs must lie in
    ///   `[liquidation_price, price]`, for shorts in `[price, liquidation_price]`
    /// * `tp_price` - Optional take-profit (0 = none); must lie on the
    ///   profitable side of the entry price
    ///
    /// # Returns
    ///
    /// The new position id
    pub fn open_position(
        env: Env,
        trader: Address,
        asset_index: u32,
        proof: Bytes,
        is_long: bool,
        leverage: u32,
        size_usd: u128,
        sl_price: u128,
        tp_price: u128,
    ) -> u64 {
        trader.require_auth();

        let info = require_listed(&env, asset_index);
        if !is_market_open(&env, info.asset_type) {
            panic_with_error!(&env, EngineError::MarketClosed);
        }
        if leverage < MIN_LEVERAGE || leverage > MAX_LEVERAGE {
            panic_with_error!(&env, EngineError::InvalidLeverage);
        }
        if size_usd < MIN_SIZE_USD {
            panic_with_error!(&env, EngineError::MinSize);
        }

        let this = env.current_contract_address();
        let vault = MarginVaultClient::new(&env, &get_vault_addr(&env));
        vault.deposit_margin(&this, &trader, &size_usd);

        let oracle = OracleVerifierClient::new(&env, &get_oracle_addr(&env));
        let assertions = oracle.verify(&proof);
        let price = price_from_proof(&env, &assertions, asset_index);

        let liq_price = liquidation_price(price, leverage, is_long);
        validate_open_targets(&env, is_long, price, liq_price, sl_price, tp_price);

        let open = OpenPosition {
            id: 0,
            trader: trader.clone(),
            asset_index,
            is_long,
            leverage,
            open_price: price,
            size_usd,
            timestamp: env.ledger().timestamp(),
            sl_bucket_id: sl_price / info.bucket_size,
            tp_bucket_id: tp_price / info.bucket_size,
            liq_bucket_id: liq_price / info.bucket_size,
            stop_loss_price: sl_price,
            take_profit_price: tp_price,
            liquidation_price: liq_price,
        };

        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));
        let id = storage.store_open(&this, &open);
        register_position_buckets(&env, &storage, id, &open);

        id
    }

    /// Close a live position at the oracle price in `proof`. Only the
    /// recorded trader may close.
    ///
    /// # Returns
    ///
    /// The realized PnL
    pub fn close_position(env: Env, trader: Address, open_id: u64, proof: Bytes) -> i128 {
        trader.require_auth();

        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));
        let open = storage
            .get_open_by_id(&open_id)
            .unwrap_or_else(|| panic_with_error!(&env, EngineError::PositionNotFound));
        if open.trader != trader {
            panic_with_error!(&env, EngineError::NotPositionOwner);
        }
        if open.size_usd == 0 {
            panic_with_error!(&env, EngineError::PositionAlreadyClosed);
        }

        let oracle = OracleVerifierClient::new(&env, &get_oracle_addr(&env));
        let assertions = oracle.verify(&proof);
        let price = price_from_proof(&env, &assertions, open.asset_index);

        let (close_margin, pnl) = settle_amounts(
            &env,
            open.open_price,
            price,
            open.size_usd,
            open.leverage,
            open.is_long,
        );
        finalize_close(&env, &open, price, close_margin, pnl);

        pnl
    }

    /// Pre-register a limit order to open a position once the executor
    /// observes the order price. No oracle price is consulted at placement;
    /// margin is escrowed immediately.
    ///
    /// # Arguments
    ///
    /// * `trader` - The order owner (must authorize)
    /// * `asset_index` - A listed asset whose market class is open
    /// * `is_long` - Direction of the position to open
    /// * `leverage` - Multiplier in `[1, 100]`
    /// * `order_price` - The fill price (non-zero)
    /// * `size_usd` - Margin to escrow, at least `MIN_SIZE_USD`
    /// * `stop_loss` / `take_profit` - Optional triggers carried onto the
    ///   position at fill; when both are set they must bracket the order
    ///   price on the correct sides
    ///
    /// # Returns
    ///
    /// The new order id
    pub fn place_order(
        env: Env,
        trader: Address,
        asset_index: u32,
        is_long: bool,
        leverage: u32,
        order_price: u128,
        size_usd: u128,
        stop_loss: u128,
        take_profit: u128,
    ) -> u64 {
        trader.require_auth();

        let info = require_listed(&env, asset_index);
        if !is_market_open(&env, info.asset_type) {
            panic_with_error!(&env, EngineError::MarketClosed);
        }
        if leverage < MIN_LEVERAGE || leverage > MAX_LEVERAGE {
            panic_with_error!(&env, EngineError::InvalidLeverage);
        }
        if size_usd < MIN_SIZE_USD {
            panic_with_error!(&env, EngineError::MinSize);
        }
        if order_price == 0 {
            panic_with_error!(&env, EngineError::PriceZero);
        }
        if stop_loss > 0 && take_profit > 0 {
            let ok = if is_long {
                stop_loss < order_price && order_price < take_profit
            } else {
                take_profit < order_price && order_price < stop_loss
            };
            if !ok {
                panic_with_error!(&env, EngineError::InvalidSLTP);
            }
        }

        let this = env.current_contract_address();
        let vault = MarginVaultClient::new(&env, &get_vault_addr(&env));
        vault.deposit_margin(&this, &trader, &size_usd);

        let order = LimitOrder {
            id: 0,
            trader: trader.clone(),
            asset_index,
            is_long,
            leverage,
            order_price,
            size_usd,
            timestamp: env.ledger().timestamp(),
            stop_loss,
            take_profit,
            limit_bucket_id: order_price / info.bucket_size,
        };

        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));
        let id = storage.store_order(&this, &order);
        storage.add_to_bucket(
            &this,
            &BUCKET_KIND_LIMIT,
            &asset_index,
            &order.limit_bucket_id,
            &id,
            &order_price,
        );

        id
    }

    /// Cancel a pending order and refund its full margin. Only the order's
    /// original trader may cancel.
    pub fn cancel_order(env: Env, trader: Address, order_id: u64) {
        trader.require_auth();

        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));
        let order = storage
            .get_order_by_id(&order_id)
            .unwrap_or_else(|| panic_with_error!(&env, EngineError::OrderNotFound));
        if order.trader != trader {
            panic_with_error!(&env, EngineError::NotOrderOwner);
        }

        let this = env.current_contract_address();
        storage.remove_from_bucket(
            &this,
            &BUCKET_KIND_LIMIT,
            &order.asset_index,
            &order.limit_bucket_id,
            &order_id,
        );
        storage.remove_order(&this, &trader, &order_id);

        let vault = MarginVaultClient::new(&env, &get_vault_addr(&env));
        vault.settle_margin(&this, &trader, &order.size_usd, &order.size_usd);
    }

    /// Move a position's stop-loss (`kind = 0`) or take-profit (`kind = 1`)
    /// to a new level. The level is validated against the recorded entry and
    /// liquidation prices; bucket membership and the stored trigger move in
    /// one storage write.
    pub fn update_target(
        env: Env,
        trader: Address,
        position_id: u64,
        kind: u32,
        new_target_price: u128,
    ) {
        trader.require_auth();

        if kind != TARGET_KIND_STOP_LOSS && kind != TARGET_KIND_TAKE_PROFIT {
            panic_with_error!(&env, EngineError::InvalidTargetType);
        }
        if new_target_price == 0 {
            panic_with_error!(&env, EngineError::InvalidSLTP);
        }

        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));
        let open = storage
            .get_open_by_id(&position_id)
            .unwrap_or_else(|| panic_with_error!(&env, EngineError::PositionNotFound));
        if open.trader != trader {
            panic_with_error!(&env, EngineError::NotPositionOwner);
        }

        let ok = if kind == TARGET_KIND_STOP_LOSS {
            if open.is_long {
                new_target_price >= open.liquidation_price && new_target_price <= open.open_price
            } else {
                new_target_price >= open.open_price && new_target_price <= open.liquidation_price
            }
        } else if open.is_long {
            new_target_price > open.open_price
        } else {
            new_target_price < open.open_price
        };
        if !ok {
            panic_with_error!(&env, EngineError::InvalidSLTP);
        }

        let info = require_listed(&env, open.asset_index);
        let new_bucket_id = new_target_price / info.bucket_size;

        storage.update_position_target(
            &env.current_contract_address(),
            &position_id,
            &kind,
            &new_bucket_id,
            &new_target_price,
        );
    }

    /// Executor sweep over the `LIMIT` buckets: fill every pending order
    /// whose price lies within tolerance of an asserted price. Filled orders
    /// are promoted to positions at their order price.
    pub fn execute_orders(env: Env, executor: Address, proof: Bytes) {
        require_executor(&env, &executor);

        let oracle = OracleVerifierClient::new(&env, &get_oracle_addr(&env));
        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));

        for assertion in oracle.verify(&proof).iter() {
            let info = match asset_info(&env, assertion.pair_id) {
                Some(info) => info,
                None => continue,
            };
            if assertion.price == 0 {
                continue;
            }
            let center = assertion.price / info.bucket_size;
            for bucket_id in neighbourhood(center) {
                let bucket_id = match bucket_id {
                    Some(b) => b,
                    None => continue,
                };
                // Snapshot; entries retired below must not be revisited.
                let entries =
                    storage.get_bucket(&BUCKET_KIND_LIMIT, &assertion.pair_id, &bucket_id);
                for entry in entries.iter() {
                    if !within_tolerance(&env, assertion.price, entry.target_price) {
                        continue;
                    }
                    let order = match storage.get_order_by_id(&entry.id) {
                        Some(order) => order,
                        None => continue,
                    };
                    if order.size_usd == 0 {
                        continue;
                    }
                    promote_order(&env, &storage, &order, &info);
                }
            }
        }
    }

    /// Executor sweep over the `SLTP` buckets: close every live position
    /// whose stop-loss or take-profit lies within tolerance of an asserted
    /// price. The close settles at the oracle price.
    pub fn close_all_on_targets(env: Env, executor: Address, proof: Bytes) {
        require_executor(&env, &executor);

        let oracle = OracleVerifierClient::new(&env, &get_oracle_addr(&env));
        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));

        for assertion in oracle.verify(&proof).iter() {
            let info = match asset_info(&env, assertion.pair_id) {
                Some(info) => info,
                None => continue,
            };
            if assertion.price == 0 {
                continue;
            }
            let center = assertion.price / info.bucket_size;
            for bucket_id in neighbourhood(center) {
                let bucket_id = match bucket_id {
                    Some(b) => b,
                    None => continue,
                };
                let entries =
                    storage.get_bucket(&BUCKET_KIND_SLTP, &assertion.pair_id, &bucket_id);
                for entry in entries.iter() {
                    if !within_tolerance(&env, assertion.price, entry.target_price) {
                        continue;
                    }
                    // A position can sit in several scanned buckets; only
                    // the first observed trigger finalizes it.
                    let open = match storage.get_open_by_id(&entry.id) {
                        Some(open) => open,
                        None => continue,
                    };
                    if open.size_usd == 0 {
                        continue;
                    }
                    let (close_margin, pnl) = settle_amounts(
                        &env,
                        open.open_price,
                        assertion.price,
                        open.size_usd,
                        open.leverage,
                        open.is_long,
                    );
                    finalize_close(&env, &open, assertion.price, close_margin, pnl);
                }
            }
        }
    }

    /// Executor sweep over the `LIQ` buckets: liquidate every live position
    /// whose liquidation price lies within tolerance of an asserted price.
    /// The trader's entire margin is forfeited.
    pub fn liquidate_positions(env: Env, executor: Address, proof: Bytes) {
        require_executor(&env, &executor);

        let oracle = OracleVerifierClient::new(&env, &get_oracle_addr(&env));
        let storage = TradeStorageClient::new(&env, &get_storage_addr(&env));

        for assertion in oracle.verify(&proof).iter() {
            let info = match asset_info(&env, assertion.pair_id) {
                Some(info) => info,
                None => continue,
            };
            if assertion.price == 0 {
                continue;
            }
            let center = assertion.price / info.bucket_size;
            for bucket_id in neighbourhood(center) {
                let bucket_id = match bucket_id {
                    Some(b) => b,
                    None => continue,
                };
                let entries =
                    storage.get_bucket(&BUCKET_KIND_LIQ, &assertion.pair_id, &bucket_id);
                for entry in entries.iter() {
                    if !within_tolerance(&env, assertion.price, entry.target_price) {
                        continue;
                    }
                    let open = match storage.get_open_by_id(&entry.id) {
                        Some(open) => open,
                        None => continue,
                    };
                    if open.size_usd == 0 {
                        continue;
                    }
                    let loss = i128::try_from(open.size_usd).unwrap_or(i128::MAX);
                    finalize_close(&env, &open, assertion.price, 0, -loss);
                }
            }
        }
    }

    // Views

    /// Get the listing record for an asset.
    ///
    /// # Panics
    ///
    /// Panics with `AssetNotListed` for an unknown index
    pub fn get_asset(env: Env, asset_index: u32) -> AssetInfo {
        require_listed(&env, asset_index)
    }

    /// Whether an asset index has been listed.
    pub fn is_asset_listed(env: Env, asset_index: u32) -> bool {
        asset_info(&env, asset_index).is_some()
    }

    /// Whether an asset class is currently trading.
    pub fn get_market_open(env: Env, asset_type: u32) -> bool {
        is_market_open(&env, asset_type)
    }

    /// The stored informational funding rate for an asset.
    pub fn get_funding_rate(env: Env, asset_index: u32) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::FundingRate(asset_index))
            .unwrap_or(0)
    }

    /// The stored informational spread for an asset.
    pub fn get_spread(env: Env, asset_index: u32) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::Spread(asset_index))
            .unwrap_or(0)
    }

    /// The current trigger tolerance.
    pub fn get_tolerance(env: Env) -> u32 {
        get_tolerance(&env)
    }

    /// The administrator address.
    pub fn admin(env: Env) -> Address {
        get_admin(&env)
    }

    /// The executor address.
    pub fn executor(env: Env) -> Address {
        get_executor(&env)
    }
}
