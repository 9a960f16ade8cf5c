use soroban_sdk::{Address, Env};

use trade_storage::{
    OpenPosition, TradeStorageClient, BUCKET_KIND_LIQ, BUCKET_KIND_SLTP,
};

/// Count how many entries for `id` sit in a given bucket.
fn bucket_occurrences(
    storage: &TradeStorageClient,
    kind: u32,
    asset_index: u32,
    bucket_id: u128,
    id: u64,
) -> u32 {
    let mut count = 0;
    for entry in storage.get_bucket(&kind, &asset_index, &bucket_id).iter() {
        if entry.id == id {
            count += 1;
        }
    }
    count
}

/// Assert a live position satisfies the index invariant: exactly one LIQ
/// membership, and one SLTP membership per non-zero trigger, at the bucket
/// ids recorded on the position.
pub fn assert_position_fully_indexed(
    _env: &Env,
    storage: &TradeStorageClient,
    open: &OpenPosition,
) {
    assert_eq!(
        bucket_occurrences(storage, BUCKET_KIND_LIQ, open.asset_index, open.liq_bucket_id, open.id),
        1,
        "position {} missing from its LIQ bucket",
        open.id
    );

    let expected_sl = if open.stop_loss_price > 0 { 1 } else { 0 };
    assert_eq!(
        bucket_occurrences(storage, BUCKET_KIND_SLTP, open.asset_index, open.sl_bucket_id, open.id),
        expected_sl,
        "position {} stop-loss membership mismatch",
        open.id
    );

    let expected_tp = if open.take_profit_price > 0 { 1 } else { 0 };
    // When SL and TP share a bucket the two entries are distinguishable
    // only by count, so check the combined bucket in that case.
    if open.take_profit_price > 0 && open.tp_bucket_id != open.sl_bucket_id {
        assert_eq!(
            bucket_occurrences(
                storage,
                BUCKET_KIND_SLTP,
                open.asset_index,
                open.tp_bucket_id,
                open.id
            ),
            expected_tp,
            "position {} take-profit membership mismatch",
            open.id
        );
    }
}

/// Assert a finalized position left no trace in any of its buckets.
pub fn assert_position_fully_deindexed(
    _env: &Env,
    storage: &TradeStorageClient,
    open: &OpenPosition,
) {
    for (kind, bucket_id) in [
        (BUCKET_KIND_LIQ, open.liq_bucket_id),
        (BUCKET_KIND_SLTP, open.sl_bucket_id),
        (BUCKET_KIND_SLTP, open.tp_bucket_id),
    ] {
        assert_eq!(
            bucket_occurrences(storage, kind, open.asset_index, bucket_id, open.id),
            0,
            "position {} still indexed in kind {} bucket {}",
            open.id,
            kind,
            bucket_id
        );
    }
}

/// Assert the per-trader id lists match the expected live entity counts.
pub fn assert_user_entities_tracked(
    _env: &Env,
    storage: &TradeStorageClient,
    trader: &Address,
    expected_opens: u32,
    expected_orders: u32,
) {
    let opens = storage.get_user_open_ids(trader);
    assert_eq!(
        opens.len(),
        expected_opens,
        "open id list length mismatch for trader"
    );
    for id in opens.iter() {
        let open = storage.get_open_by_id(&id).expect("listed open id missing");
        assert_eq!(&open.trader, trader, "listed open owned by someone else");
    }

    let orders = storage.get_user_order_ids(trader);
    assert_eq!(
        orders.len(),
        expected_orders,
        "order id list length mismatch for trader"
    );
    for id in orders.iter() {
        let order = storage.get_order_by_id(&id).expect("listed order id missing");
        assert_eq!(&order.trader, trader, "listed order owned by someone else");
    }
}

/// Assert a trader's realized PnL history sums to the given total.
pub fn assert_total_pnl(
    _env: &Env,
    storage: &TradeStorageClient,
    trader: &Address,
    expected: i128,
) {
    let mut total = 0i128;
    for closed in storage.get_user_closeds(trader).iter() {
        total += closed.pnl;
    }
    assert_eq!(total, expected, "closed-trade PnL sum mismatch");
}
