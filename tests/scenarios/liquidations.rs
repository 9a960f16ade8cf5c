//! E2E tests for the liquidation sweep and the ordering discipline between
//! stop-loss closes and liquidations when one print touches both.

use soroban_sdk::Env;

use crate::common::{assertions::*, proof::build_proof, setup::*};

use trade_storage::{BUCKET_KIND_LIQ, BUCKET_KIND_SLTP};

const SIZE: u128 = 100_000_000;
const OPEN_PRICE: u128 = 2_000_000_000;

#[test]
fn test_short_liquidation_forfeits_margin() {
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
        &false,
        &10,
        &SIZE,
        &0,
        &0,
    );
    let open = storage.get_open_by_id(&id).unwrap();
    // 10x short liquidates at open * 11 / 10.
    assert_eq!(open.liquidation_price, 2_200_000_000);

    // Print 0.023% above the liquidation price, inside the 0.1% tolerance.
    engine.liquidate_positions(&t.executor, &build_proof(&env, &[(ASSET, 2_200_500_000)]));

    assert!(storage.get_open_by_id(&id).is_none());
    assert_position_fully_deindexed(&env, &storage, &open);

    // The trader keeps nothing and the loss equals the posted margin.
    assert_eq!(t.token_client.balance(&trader), balance_before - SIZE as i128);
    assert_total_pnl(&env, &storage, &trader, -(SIZE as i128));
    let closed = storage.get_user_closeds(&trader).get(0).unwrap();
    assert_eq!(closed.close_price, 2_200_500_000);
}

#[test]
fn test_liquidation_outside_tolerance_is_noop() {
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
        &10,
        &SIZE,
        &0,
        &0,
    );

    // With the tolerance tightened to 0.01%, a print in the liquidation
    // bucket but 0.023% away must not trigger.
    engine.set_tolerance(&t.executor, &1);
    engine.liquidate_positions(&t.executor, &build_proof(&env, &[(ASSET, 2_200_500_000)]));
    assert!(storage.get_open_by_id(&id).is_some());
}

#[test]
fn test_stop_loss_wins_over_liquidation_in_sweep_order() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let trader = t.traders.get(0).unwrap();
    let balance_before = t.token_client.balance(&trader);

    // Stop-loss sits just above the liquidation price, in the same bucket.
    let id = engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &true,
        &10,
        &SIZE,
        &1_818_500_000,
        &0,
    );
    let open = storage.get_open_by_id(&id).unwrap();
    assert_eq!(open.liquidation_price, 1_818_181_818);
    assert_eq!(open.sl_bucket_id, open.liq_bucket_id);

    // One print satisfies both predicates. The venue runs the SL/TP sweep
    // before the liquidation sweep, so the position closes at the print.
    let bundle = build_proof(&env, &[(ASSET, 1_818_400_000)]);
    engine.close_all_on_targets(&t.executor, &bundle);
    engine.liquidate_positions(&t.executor, &bundle);

    // One closed trade, settled as a stop-loss close, not a total loss.
    let closeds = storage.get_user_closeds(&trader);
    assert_eq!(closeds.len(), 1);
    assert_eq!(closeds.get(0).unwrap().pnl, -90_800_000);
    assert_eq!(
        t.token_client.balance(&trader),
        balance_before - 90_800_000
    );

    assert_eq!(storage.get_bucket(&BUCKET_KIND_SLTP, &ASSET, &1_818).len(), 0);
    assert_eq!(storage.get_bucket(&BUCKET_KIND_LIQ, &ASSET, &1_818).len(), 0);
}

#[test]
fn test_stale_snapshot_entry_skipped_after_first_trigger() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    // A coarse-bucketed asset puts a position's SL and TP into the same
    // bucket, so one sweep snapshot holds both entries.
    let wide_asset = 8u32;
    engine.list_asset(&t.admin, &wide_asset, &10_000_000_000, &0);

    let trader = t.traders.get(0).unwrap();
    let id = engine.open_position(
        &trader,
        &wide_asset,
        &build_proof(&env, &[(wide_asset, OPEN_PRICE)]),
        &false,
        &2,
        &SIZE,
        &2_000_400_000,
        &1_999_500_000,
    );

    let open = storage.get_open_by_id(&id).unwrap();
    assert_eq!(open.sl_bucket_id, 0);
    assert_eq!(open.tp_bucket_id, 0);
    assert_eq!(storage.get_bucket(&BUCKET_KIND_SLTP, &wide_asset, &0).len(), 2);

    // Both triggers lie within tolerance of one print. The first entry
    // finalizes the position; the second is a dead id and must be skipped.
    engine.close_all_on_targets(
        &t.executor,
        &build_proof(&env, &[(wide_asset, OPEN_PRICE)]),
    );

    assert_eq!(storage.get_user_closeds(&trader).len(), 1);
    assert!(storage.get_open_by_id(&id).is_none());
    assert_eq!(storage.get_bucket(&BUCKET_KIND_SLTP, &wide_asset, &0).len(), 0);
}

#[test]
fn test_unlisted_pair_in_bundle_is_skipped() {
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
        &10,
        &SIZE,
        &0,
        &0,
    );

    // The bundle carries an unknown pair alongside the touching print; the
    // sweep ignores the stranger and still liquidates.
    engine.liquidate_positions(
        &t.executor,
        &build_proof(&env, &[(99, 5_000_000), (ASSET, 2_200_500_000)]),
    );
    assert!(storage.get_open_by_id(&id).is_none());
}

#[test]
fn test_liquidation_sweep_is_idempotent() {
    let env = Env::default();
    let t = setup_focused_test(&env);
    let engine = t.engine();
    let storage = t.storage();

    let trader = t.traders.get(0).unwrap();
    engine.open_position(
        &trader,
        &ASSET,
        &build_proof(&env, &[(ASSET, OPEN_PRICE)]),
        &false,
        &10,
        &SIZE,
        &0,
        &0,
    );

    let bundle = build_proof(&env, &[(ASSET, 2_200_500_000)]);
    engine.liquidate_positions(&t.executor, &bundle);
    engine.liquidate_positions(&t.executor, &bundle);

    assert_eq!(storage.get_user_closeds(&trader).len(), 1);
    assert_total_pnl(&env, &storage, &trader, -(SIZE as i128));
}
