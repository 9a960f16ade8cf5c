#![no_std]

//! # Margin Vault Contract
//!
//! Custodies the collateral token for the trading venue and acts as the
//! counterparty to every trader position. Liquidity providers deposit the
//! unit token for shares; traders' posted margin is tracked separately and
//! never dilutes or credits the LP book.
//!
//! ## Key Features
//! - **LP Deposits/Withdrawals**: pro-rata share issuance over pool value
//!   (token balance minus trader margin)
//! - **Margin Custody**: per-trader margin balances, credited on
//!   `deposit_margin`, debited on `settle_margin`
//! - **Settlement**: `settle_margin(trader, open_margin, close_margin)` pays
//!   out `close_margin` (zero on liquidation, above `open_margin` on profit,
//!   funded by LP liquidity)
//!
//! ## Access Control
//! Margin operations are restricted to the core principal (the trading
//! engine). LP operations authenticate the LP directly.

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, panic_with_error, token, Address, Env,
};

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum VaultError {
    NotAuthorized = 1,
    AlreadyInitialized = 2,
    AmountNotPositive = 3,
    InsufficientShares = 4,
    InsufficientMargin = 5,
    InvalidPoolState = 6,
}

#[derive(Clone)]
#[contracttype]
pub enum DataKey {
    Core,
    Token,
    TotalShares,
    Shares(Address),
    TotalMargin,
    MarginBalance(Address),
}

#[contract]
pub struct MarginVault;

// Helper functions for storage access

fn get_core(e: &Env) -> Address {
    e.storage()
        .instance()
        .get(&DataKey::Core)
        .unwrap_or_else(|| panic_with_error!(e, VaultError::NotAuthorized))
}

fn require_core(e: &Env, caller: &Address) {
    caller.require_auth();
    if caller != &get_core(e) {
        panic_with_error!(e, VaultError::NotAuthorized);
    }
}

fn get_token(e: &Env) -> Address {
    e.storage().instance().get(&DataKey::Token).unwrap()
}

fn get_balance(e: &Env) -> i128 {
    let token = get_token(e);
    token::Client::new(e, &token).balance(&e.current_contract_address())
}

fn get_total_shares(e: &Env) -> i128 {
    e.storage()
        .instance()
        .get(&DataKey::TotalShares)
        .unwrap_or(0)
}

fn put_total_shares(e: &Env, amount: i128) {
    e.storage().instance().set(&DataKey::TotalShares, &amount)
}

fn get_shares(e: &Env, user: &Address) -> i128 {
    e.storage()
        .persistent()
        .get(&DataKey::Shares(user.clone()))
        .unwrap_or(0)
}

fn put_shares(e: &Env, user: &Address, amount: i128) {
    e.storage()
        .persistent()
        .set(&DataKey::Shares(user.clone()), &amount);
}

fn get_total_margin(e: &Env) -> u128 {
    e.storage()
        .instance()
        .get(&DataKey::TotalMargin)
        .unwrap_or(0)
}

fn put_total_margin(e: &Env, amount: u128) {
    e.storage().instance().set(&DataKey::TotalMargin, &amount);
}

fn get_margin_balance(e: &Env, trader: &Address) -> u128 {
    e.storage()
        .persistent()
        .get(&DataKey::MarginBalance(trader.clone()))
        .unwrap_or(0)
}

fn put_margin_balance(e: &Env, trader: &Address, amount: u128) {
    if amount == 0 {
        e.storage()
            .persistent()
            .remove(&DataKey::MarginBalance(trader.clone()));
    } else {
        e.storage()
            .persistent()
            .set(&DataKey::MarginBalance(trader.clone()), &amount);
    }
}

/// Pool value backing LP shares: token balance minus trader margin custody.
fn get_pool_value(e: &Env) -> i128 {
    get_balance(e) - get_total_margin(e) as i128
}

#[contractimpl]
impl MarginVault {
    /// Initialize the vault with the core principal and collateral token.
    ///
    /// # Arguments
    ///
    /// * `admin` - The administrator address (must authorize)
    /// * `core` - The trading engine contract address
    /// * `token` - The collateral token contract address
    ///
    /// # Panics
    ///
    /// Panics if already initialized
    pub fn initialize(env: Env, admin: Address, core: Address, token: Address) {
        if env.storage().instance().has(&DataKey::Core) {
            panic_with_error!(&env, VaultError::AlreadyInitialized);
        }

        admin.require_auth();

        env.storage().instance().set(&DataKey::Core, &core);
        env.storage().instance().set(&DataKey::Token, &token);
        put_total_shares(&env, 0);
        put_total_margin(&env, 0);
    }

    /// Get the collateral token address.
    pub fn token(env: Env) -> Address {
        get_token(&env)
    }

    /// Deposit tokens as a liquidity provider and receive shares.
    ///
    /// # Arguments
    ///
    /// * `lp` - The depositor (must authorize)
    /// * `amount` - The token amount to deposit
    ///
    /// # Returns
    ///
    /// The number of shares minted
    pub fn deposit(env: Env, lp: Address, amount: i128) -> i128 {
        lp.require_auth();

        if amount <= 0 {
            panic_with_error!(&env, VaultError::AmountNotPositive);
        }

        let token = get_token(&env);
        let total_shares = get_total_shares(&env);

        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&lp, &env.current_contract_address(), &amount);

        // Pro-rata issuance against pool value before this deposit, so
        // existing LPs keep their proportional ownership.
        let shares_to_mint = if total_shares == 0 {
            amount
        } else {
            let pool_value_before = get_pool_value(&env) - amount;
            if pool_value_before <= 0 {
                panic_with_error!(&env, VaultError::InvalidPoolState);
            }
            (amount * total_shares) / pool_value_before
        };

        put_shares(&env, &lp, get_shares(&env, &lp) + shares_to_mint);
        put_total_shares(&env, total_shares + shares_to_mint);

        shares_to_mint
    }

    /// Burn shares and withdraw the proportional pool value.
    ///
    /// # Arguments
    ///
    /// * `lp` - The withdrawer (must authorize)
    /// * `shares` - The number of shares to burn
    ///
    /// # Returns
    ///
    /// The token amount returned
    pub fn withdraw(env: Env, lp: Address, shares: i128) -> i128 {
        lp.require_auth();

        if shares <= 0 {
            panic_with_error!(&env, VaultError::AmountNotPositive);
        }

        let total_shares = get_total_shares(&env);
        let held = get_shares(&env, &lp);
        if shares > held || total_shares == 0 {
            panic_with_error!(&env, VaultError::InsufficientShares);
        }

        // Trader margin is custody, never part of the withdrawable pool.
        let pool_value = get_pool_value(&env);
        let tokens_to_return = (shares * pool_value) / total_shares;

        put_shares(&env, &lp, held - shares);
        put_total_shares(&env, total_shares - shares);

        let token = get_token(&env);
        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&env.current_contract_address(), &lp, &tokens_to_return);

        tokens_to_return
    }

    /// Pull margin from a trader into vault custody and credit their
    /// internal balance. Core only.
    ///
    /// # Arguments
    ///
    /// * `core` - The core principal (must authorize)
    /// * `trader` - The trader posting margin (must have approved the vault)
    /// * `amount` - The margin amount in token base units
    pub fn deposit_margin(env: Env, core: Address, trader: Address, amount: u128) {
        require_core(&env, &core);

        if amount == 0 {
            panic_with_error!(&env, VaultError::AmountNotPositive);
        }

        let token = get_token(&env);
        let token_client = token::Client::new(&env, &token);
        token_client.transfer(&trader, &env.current_contract_address(), &(amount as i128));

        put_margin_balance(&env, &trader, get_margin_balance(&env, &trader) + amount);
        put_total_margin(&env, get_total_margin(&env) + amount);
    }

    /// Settle a trade: debit `open_margin` from the trader's custody balance
    /// and pay `close_margin` of the token back to the trader. Core only.
    ///
    /// `close_margin == 0` is the liquidation case; `close_margin` above
    /// `open_margin` is a profitable close funded by LP liquidity.
    ///
    /// # Panics
    ///
    /// Panics with `InsufficientMargin` when the trader's custody balance is
    /// below `open_margin`
    pub fn settle_margin(
        env: Env,
        core: Address,
        trader: Address,
        open_margin: u128,
        close_margin: u128,
    ) {
        require_core(&env, &core);

        let balance = get_margin_balance(&env, &trader);
        if balance < open_margin {
            panic_with_error!(&env, VaultError::InsufficientMargin);
        }

        put_margin_balance(&env, &trader, balance - open_margin);
        put_total_margin(&env, get_total_margin(&env) - open_margin);

        if close_margin > 0 {
            let token = get_token(&env);
            let token_client = token::Client::new(&env, &token);
            token_client.transfer(
                &env.current_contract_address(),
                &trader,
                &(close_margin as i128),
            );
        }
    }

    /// Get a trader's margin custody balance.
    pub fn margin_balance(env: Env, trader: Address) -> u128 {
        get_margin_balance(&env, &trader)
    }

    /// Get the total margin held in custody across all traders.
    pub fn total_margin(env: Env) -> u128 {
        get_total_margin(&env)
    }

    /// Get the LP share balance for a user.
    pub fn get_shares(env: Env, user: Address) -> i128 {
        get_shares(&env, &user)
    }

    /// Get the total number of LP shares in circulation.
    pub fn get_total_shares(env: Env) -> i128 {
        get_total_shares(&env)
    }

    /// Get the liquidity available to pay out profits (pool value net of
    /// trader margin custody).
    pub fn available_liquidity(env: Env) -> i128 {
        get_pool_value(&env)
    }
}
