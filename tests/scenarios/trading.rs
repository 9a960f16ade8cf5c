//! E2E tests for trader-initiated position lifecycle: open, close, and the
//! margin flows they produce.

use soroban_sdk::Env;

use crate::common::{assertions::*, proof::build_proof, setup::*};

const SIZE: u128 = 100_000_000; // 100 units
const LEVERAGE: u32 = 10;
const OPEN_PRICE: u128 = 2_000_000_000; // $2,000

#[test]
fn test_basic_long_open_close() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let trader = t.traders.get(0).unwrap();
    let balance_before = t.token_client.balance(&trader);

    let id = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &true,
        &LEVERAGE,
        &SIZE,
        &0,
        &0,
    );

    let open = storage.get_open_by_id(&id).unwrap();
    assert_position_fully_indexed(&env, &storage, &open);
    assert_user_entities_tracked(&env, &storage, &trader, 1, 0);

    // Close 10% higher: 10x leverage doubles the margin.
    let pnl = engine.close_position(
        &trader,
        &id,
        &build_proof(&env, &[(ASSET, 2_200_000_000)]),
    );
    assert_eq!(pnl, 100_000_000);

    // The vault paid out margin plus profit in one settlement.
    assert_eq!(t.token_client.balance(&trader), balance_before + 100_000_000);
    assert_position_fully_deindexed(&env, &storage, &open);
    assert_user_entities_tracked(&env, &storage, &trader, 0, 0);
    assert_total_pnl(&env, &storage, &trader, 100_000_000);

    let closed = storage.get_user_closeds(&trader).get(0).unwrap();
    assert_eq!(closed.open_price, OPEN_PRICE);
    assert_eq!(closed.close_price, 2_200_000_000);
    assert_eq!(closed.size_usd, SIZE);
    assert_eq!(closed.leverage, LEVERAGE);
}

#[test]
fn test_short_position_profits_on_drop() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let trader = t.traders.get(0).unwrap();

    let id = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &false,
        &5,
        &SIZE,
        &0,
        &0,
    );

    // 5% drop at 5x is a 25% gain on margin.
    let pnl = engine.close_position(
        &trader,
        &id,
        &build_proof(&env, &[(ASSET, 1_900_000_000)]),
    );
    assert_eq!(pnl, 25_000_000);
    assert_total_pnl(&env, &storage, &trader, 25_000_000);
}

#[test]
fn test_multi_user_positions_stay_disjoint() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let mut ids = soroban_sdk::Vec::new(&env);
    for i in 0..5 {
        let trader = t.traders.get(i).unwrap();
        let is_long = (i % 2) == 0;
        let id = engine.open_position(
            &trader,
            &ASSET,
            &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
            &is_long,
            &LEVERAGE,
            &SIZE,
            &0,
            &0,
        );
        ids.push_back(id);
    }

    // Ids are assigned strictly monotonically.
    for i in 0..5 {
        assert_eq!(ids.get(i).unwrap(), (i + 1) as u64);
        let trader = t.traders.get(i).unwrap();
        assert_user_entities_tracked(&env, &storage, &trader, 1, 0);
    }

    // Closing one trader's position leaves the others untouched.
    let closer = t.traders.get(2).unwrap();
    engine.close_position(
        &closer,
        &ids.get(2).unwrap(),
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
    );

    assert_user_entities_tracked(&env, &storage, &closer, 0, 0);
    for i in [0u32, 1, 3, 4] {
        let trader = t.traders.get(i).unwrap();
        assert_user_entities_tracked(&env, &storage, &trader, 1, 0);
    }

    // A flat close settles exactly the posted margin.
    assert_total_pnl(&env, &storage, &closer, 0);
}

#[test]
fn test_position_ids_never_reissued_after_close() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();

    let trader = t.traders.get(0).unwrap();

    let first = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &true,
        &LEVERAGE,
        &SIZE,
        &0,
        &0,
    );
    engine.close_position(
        &trader,
        &first,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
    );

    let second = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &true,
        &LEVERAGE,
        &SIZE,
        &0,
        &0,
    );
    assert!(second > first);
}

#[test]
#[should_panic(expected = "Error(Contract, #13)")]
fn test_close_of_erased_position_not_found() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();

    let trader = t.traders.get(0).unwrap();
    let id = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &true,
        &LEVERAGE,
        &SIZE,
        &0,
        &0,
    );

    engine.close_position(&trader, &id, &build_proof(&env, &[(ASSET, OPEN_PRICE)]));
    // The id was erased by the close; a second close cannot find it.
    engine.close_position(&trader, &id, &build_proof(&env, &[(ASSET, OPEN_PRICE)]));
}

#[test]
fn test_trader_balance_reconciles_with_pnl_history() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let trader = t.traders.get(0).unwrap();
    let balance_start = t.token_client.balance(&trader);

    // A winning trade, a losing trade, and a flat trade.
    let legs: [(bool, u128); 3] = [
        (true, 2_100_000_000),
        (true, 1_960_000_000),
        (false, 2_000_000_000),
    ];
    for (is_long, close_price) in legs {
        let id = engine.open_position(
            &trader,
            &ASSET,
            &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
            &is_long,
            &LEVERAGE,
            &SIZE,
            &0,
            &0,
        );
        engine.close_position(&trader, &id, &build_proof(&env, &[(ASSET, close_price)]));
    }

    // Sum of logged PnL equals returned minus deposited across the trades.
    let mut total = 0i128;
    for closed in storage.get_user_closeds(&trader).iter() {
        total += closed.pnl;
    }
    assert_eq!(
        t.token_client.balance(&trader),
        balance_start + total
    );
}
