//! Reconciliation engine
//!
//! One cycle:
//!
//! 1. Load the pending activity set.
//! 2. Per venue, in parallel: status (A), balances (B), status again (C),
//!    repeated until A == C. Only an agreeing A/C and its B are accepted.
//! 3. Back-fill withdrawal tx hashes reported by venues, then run the same
//!    protocol against the chain (tx lookups and reserve balances).
//! 4. Merge both sides into each record and persist what changed.
//! 5. Store the new auth snapshot, falling back to last cycle's balances for
//!    any source that failed.
//!
//! Only storage failures abort a cycle. Everything else is contained to the
//! venue, node or record it came from and surfaces through the snapshot's
//! `valid` / `error` fields.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reserve_storage::{ActivityStorage, StorageError};
use reserve_types::{
    Action, ActivityId, ActivityParams, ActivityRecord, ActivityStatus, AuthDataSnapshot,
    BalanceEntry, EBalanceEntry, ExchangeStatus, MiningStatus, Timepoint, TokenSymbol, VenueId,
};
use tracing::{debug, info, warn};

use crate::{
    ChainError, ChainReader, EngineConfig, EngineResult, TxStatus, Venue, VenueError,
};

type StatusMap = HashMap<ActivityId, ActivityStatus>;

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub timepoint: Timepoint,
    pub pending_before: usize,
    pub updated: usize,
    pub still_pending: usize,
    pub valid: bool,
    pub error: String,
}

/// One venue's accepted result: balances and the statuses they agree with
struct VenuePoll {
    venue: VenueId,
    balance: Result<EBalanceEntry, String>,
    statuses: StatusMap,
}

struct ChainPoll {
    balances: Result<BTreeMap<TokenSymbol, BalanceEntry>, String>,
    statuses: StatusMap,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

async fn timed<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, call).await {
        Ok(reply) => reply,
        Err(_) => Err(on_timeout()),
    }
}

/// The node does not know the tx. Fail it once a later rate-setting nonce is
/// confirmed or the expiry has passed; otherwise keep it provisional.
pub fn resolve_lost(
    record: &ActivityRecord,
    now: Timepoint,
    mined_nonce: Option<u64>,
    expiry: Duration,
) -> ActivityStatus {
    let nonce_passed = record.action == Action::SetRates
        && matches!((record.result.nonce, mined_nonce), (Some(nonce), Some(mined)) if nonce < mined);
    let expired = now.since(record.timestamp) > expiry;

    if nonce_passed || expired {
        debug!(id = %record.id, nonce_passed, expired, "lost transaction resolved to failed");
        ActivityStatus::mining(record, MiningStatus::Failed, 0)
    } else {
        ActivityStatus::mining(record, MiningStatus::Lost, 0)
    }
}

pub struct ReconciliationEngine {
    venues: Vec<Arc<dyn Venue>>,
    chain: Arc<dyn ChainReader>,
    storage: Arc<dyn ActivityStorage>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(
        venues: Vec<Arc<dyn Venue>>,
        chain: Arc<dyn ChainReader>,
        storage: Arc<dyn ActivityStorage>,
        config: EngineConfig,
    ) -> Self {
        Self {
            venues,
            chain,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ActivityStorage> {
        &self.storage
    }

    pub async fn run_cycle(&self, block: u64) -> EngineResult<CycleSummary> {
        self.run_cycle_at(Timepoint::now(), block).await
    }

    /// Run one full cycle as of `now`, fetching chain balances at `block`
    pub async fn run_cycle_at(&self, now: Timepoint, block: u64) -> EngineResult<CycleSummary> {
        let pending = self.storage.pending_activities().await?;
        let previous = self.latest_snapshot(now).await?;
        debug!(timepoint = %now, pending = pending.len(), block, "reconciliation cycle started");

        self.warn_unrouted(&pending);

        // venue phase
        let polls = join_all(self.venues.iter().map(|venue| {
            let records: Vec<ActivityRecord> = pending
                .iter()
                .filter(|r| r.destination == *venue.id() && r.action != Action::SetRates)
                .cloned()
                .collect();
            async move { self.poll_venue(venue.as_ref(), &records, now).await }
        }))
        .await;

        let mut venue_statuses = StatusMap::new();
        for poll in &polls {
            venue_statuses.extend(poll.statuses.iter().map(|(id, s)| (id.clone(), s.clone())));
        }

        // chain phase, over records with venue-reported tx hashes filled in
        let chain_view: Vec<ActivityRecord> = pending
            .iter()
            .map(|record| with_backfilled_tx(record, venue_statuses.get(&record.id)))
            .collect();
        let mined_nonce = self.set_rate_mined_nonce(&chain_view).await;
        let chain_poll = self.poll_chain(&chain_view, block, now, mined_nonce).await;

        let mut chain_statuses = chain_poll.statuses;
        for record in &chain_view {
            let exchange = venue_statuses.get(&record.id);
            if let Some(status) = self.unresolved_after_done(record, exchange, chain_statuses.get(&record.id), now) {
                chain_statuses.insert(record.id.clone(), status);
            }
        }

        // snapshot and merge
        let mut snapshot = AuthDataSnapshot::new(now);
        snapshot.block = block;
        self.apply_venue_balances(&mut snapshot, polls, previous.as_ref(), now);
        self.apply_chain_balances(&mut snapshot, chain_poll.balances, previous.as_ref(), now);

        let pending_before = pending.len();
        let mut updated = 0;
        for record in pending {
            let exchange = venue_statuses.get(&record.id);
            let chain = chain_statuses.get(&record.id);
            if exchange.is_none() && chain.is_none() {
                snapshot.pending_activities.push(record);
                continue;
            }

            let mut merged = record.clone();
            if let Some(error) = merged.merge_statuses(exchange, chain) {
                warn!(id = %merged.id, error = %error, "activity status poll failed");
                snapshot.invalidate(format!("activity {}: {}", merged.id, error));
            }
            if merged.mining_status == MiningStatus::Failed && record.mining_status != MiningStatus::Failed {
                info!(id = %merged.id, action = %merged.action, "chain-side action marked failed");
            }
            if merged.exchange_status == ExchangeStatus::Failed && record.exchange_status != ExchangeStatus::Failed {
                info!(id = %merged.id, action = %merged.action, destination = %merged.destination, "venue-side action marked failed");
            }

            if merged != record {
                self.storage.update_activity(&merged.id, &merged).await?;
                updated += 1;
            }
            if merged.is_pending() {
                snapshot.pending_activities.push(merged);
            }
        }

        snapshot.return_time = Timepoint::now().max(now);
        if !snapshot.valid {
            warn!(timepoint = %now, error = %snapshot.error, "auth snapshot invalid");
        }
        self.storage.store_auth_snapshot(&snapshot, now).await?;

        let summary = CycleSummary {
            timepoint: now,
            pending_before,
            updated,
            still_pending: snapshot.pending_activities.len(),
            valid: snapshot.valid,
            error: snapshot.error.clone(),
        };
        info!(
            timepoint = %now,
            pending_before = summary.pending_before,
            updated = summary.updated,
            still_pending = summary.still_pending,
            valid = summary.valid,
            "reconciliation cycle complete"
        );
        Ok(summary)
    }

    /// Newest stored snapshot at or before `at`
    pub async fn latest_snapshot(&self, at: Timepoint) -> EngineResult<Option<AuthDataSnapshot>> {
        match self.storage.current_auth_data_version(at).await {
            Ok(version) => Ok(Some(self.storage.auth_data(version).await?)),
            Err(StorageError::NoSnapshot(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn warn_unrouted(&self, pending: &[ActivityRecord]) {
        let blockchain = VenueId::blockchain();
        for record in pending {
            let routed = record.destination == blockchain
                || record.action == Action::SetRates
                || self.venues.iter().any(|v| *v.id() == record.destination);
            if !routed && record.is_exchange_pending() {
                warn!(id = %record.id, destination = %record.destination, "no venue configured for pending activity");
            }
        }
    }

    // ------------------------------------------------------------------
    // Venue side
    // ------------------------------------------------------------------

    async fn poll_venue(&self, venue: &dyn Venue, records: &[ActivityRecord], now: Timepoint) -> VenuePoll {
        let id = venue.id().clone();
        let max_rounds = self.config.double_check_rounds.max(1);
        let mut round = 0;

        loop {
            round += 1;
            let before = self.venue_statuses(venue, records, now).await;

            let limit = self.config.balance_timeout();
            let balance = match timed(limit, venue.fetch_balances(now), || VenueError::Timeout {
                venue: id.clone(),
                after_ms: millis(limit),
            })
            .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(venue = %id, error = %e, "venue balance fetch failed, skipping venue this cycle");
                    return VenuePoll {
                        venue: id,
                        balance: Err(e.to_string()),
                        statuses: StatusMap::new(),
                    };
                }
            };

            if records.is_empty() {
                return VenuePoll {
                    venue: id,
                    balance: Ok(balance),
                    statuses: before,
                };
            }

            let after = self.venue_statuses(venue, records, now).await;
            if before == after {
                return VenuePoll {
                    venue: id,
                    balance: Ok(balance),
                    statuses: after,
                };
            }
            if round >= max_rounds {
                warn!(venue = %id, rounds = round, "venue statuses kept changing during balance fetch");
                return VenuePoll {
                    balance: Err(format!("statuses changed in each of {} double-check rounds", round)),
                    venue: id,
                    statuses: StatusMap::new(),
                };
            }
            debug!(venue = %id, round, "venue status changed during balance fetch, retrying");
        }
    }

    async fn venue_statuses(&self, venue: &dyn Venue, records: &[ActivityRecord], now: Timepoint) -> StatusMap {
        let replies = join_all(records.iter().map(|r| self.venue_status(venue, r, now))).await;
        records
            .iter()
            .zip(replies)
            .filter_map(|(record, status)| status.map(|s| (record.id.clone(), s)))
            .collect()
    }

    async fn venue_status(&self, venue: &dyn Venue, record: &ActivityRecord, now: Timepoint) -> Option<ActivityStatus> {
        let expired = now.since(record.timestamp) > self.config.max_lifetime();

        if !record.is_exchange_pending() {
            if record.exchange_status == ExchangeStatus::Done && expired {
                return Some(ActivityStatus::exchange(record, ExchangeStatus::Failed, None));
            }
            return None;
        }

        let limit = self.config.status_timeout();
        let on_timeout = || VenueError::Timeout {
            venue: venue.id().clone(),
            after_ms: millis(limit),
        };
        let reply = match &record.params {
            ActivityParams::Trade { base, quote, .. } => {
                timed(limit, venue.order_status(&record.id.eid, base, quote), on_timeout)
                    .await
                    .map(|status| (status, None))
            }
            ActivityParams::Deposit { token, amount } => {
                let Some(tx) = record.result.tx.as_deref().filter(|t| !t.is_empty()) else {
                    // submission failed before a tx was sent: nothing will ever arrive
                    if let Some(error) = record.result.error.as_deref() {
                        info!(id = %record.id, error, "deposit never submitted, marking failed");
                        return Some(ActivityStatus::exchange(record, ExchangeStatus::Failed, None));
                    }
                    return Some(ActivityStatus::errored(record, "deposit has no tx hash"));
                };
                timed(limit, venue.deposit_status(&record.id, tx, token, *amount, now), on_timeout)
                    .await
                    .map(|status| (status, None))
            }
            ActivityParams::Withdraw { token, amount } => {
                timed(limit, venue.withdraw_status(&record.id, token, *amount, now), on_timeout)
                    .await
                    .map(|w| (w.status, w.tx))
            }
            ActivityParams::SetRates { .. } => return None,
        };

        match reply {
            Ok((status, tx)) => {
                let status = if expired && !status.is_terminal() {
                    ExchangeStatus::Failed
                } else {
                    status
                };
                Some(ActivityStatus::exchange(record, status, tx))
            }
            Err(e) => {
                warn!(id = %record.id, venue = %venue.id(), error = %e, "venue status query failed");
                let mut status = ActivityStatus::errored(record, e.to_string());
                if expired {
                    status.exchange_status = ExchangeStatus::Failed;
                }
                Some(status)
            }
        }
    }

    fn apply_venue_balances(
        &self,
        snapshot: &mut AuthDataSnapshot,
        polls: Vec<VenuePoll>,
        previous: Option<&AuthDataSnapshot>,
        now: Timepoint,
    ) {
        for poll in polls {
            let failed = match poll.balance {
                Ok(entry) if entry.valid => {
                    snapshot.exchange_balances.insert(poll.venue, entry);
                    continue;
                }
                Ok(entry) => entry,
                Err(error) => EBalanceEntry::failed(error, now, Timepoint::now().max(now)),
            };
            snapshot.invalidate(format!("venue {}: {}", poll.venue, failed.error));
            let entry = match previous.and_then(|p| p.exchange_balances.get(&poll.venue)) {
                Some(last) => EBalanceEntry::carried_from(last, &failed),
                None => failed,
            };
            snapshot.exchange_balances.insert(poll.venue, entry);
        }
    }

    // ------------------------------------------------------------------
    // Chain side
    // ------------------------------------------------------------------

    async fn set_rate_mined_nonce(&self, records: &[ActivityRecord]) -> Option<u64> {
        let needed = records
            .iter()
            .any(|r| r.action == Action::SetRates && r.is_blockchain_pending());
        if !needed {
            return None;
        }
        let limit = self.config.status_timeout();
        match timed(limit, self.chain.set_rate_mined_nonce(), || ChainError::Timeout {
            after_ms: millis(limit),
        })
        .await
        {
            Ok(nonce) => Some(nonce),
            Err(e) => {
                warn!(error = %e, "set-rate mined nonce unavailable, lost heuristic falls back to expiry");
                None
            }
        }
    }

    async fn poll_chain(
        &self,
        records: &[ActivityRecord],
        block: u64,
        now: Timepoint,
        mined_nonce: Option<u64>,
    ) -> ChainPoll {
        let max_rounds = self.config.double_check_rounds.max(1);
        let mut round = 0;

        loop {
            round += 1;
            let before = self.chain_statuses(records, now, mined_nonce).await;

            let limit = self.config.balance_timeout();
            let balances = match timed(limit, self.chain.fetch_balances(block), || ChainError::Timeout {
                after_ms: millis(limit),
            })
            .await
            {
                Ok(balances) => balances,
                Err(e) => {
                    // statuses already obtained are still worth persisting
                    warn!(block, error = %e, "reserve balance fetch failed");
                    return ChainPoll {
                        balances: Err(e.to_string()),
                        statuses: before,
                    };
                }
            };

            if before.is_empty() {
                return ChainPoll {
                    balances: Ok(balances),
                    statuses: before,
                };
            }

            let after = self.chain_statuses(records, now, mined_nonce).await;
            if before == after {
                return ChainPoll {
                    balances: Ok(balances),
                    statuses: after,
                };
            }
            if round >= max_rounds {
                warn!(rounds = round, "chain statuses kept changing during balance fetch");
                return ChainPoll {
                    balances: Err(format!("tx statuses changed in each of {} double-check rounds", round)),
                    statuses: StatusMap::new(),
                };
            }
            debug!(round, "chain status changed during balance fetch, retrying");
        }
    }

    async fn chain_statuses(&self, records: &[ActivityRecord], now: Timepoint, mined_nonce: Option<u64>) -> StatusMap {
        let candidates: Vec<&ActivityRecord> = records
            .iter()
            .filter(|r| r.action != Action::Trade && r.is_blockchain_pending())
            .collect();
        let replies = join_all(candidates.iter().map(|r| self.chain_status(r, now, mined_nonce))).await;
        candidates
            .into_iter()
            .zip(replies)
            .filter_map(|(record, status)| status.map(|s| (record.id.clone(), s)))
            .collect()
    }

    async fn chain_status(&self, record: &ActivityRecord, now: Timepoint, mined_nonce: Option<u64>) -> Option<ActivityStatus> {
        let tx = match record.result.tx_hash() {
            Ok(Some(tx)) if !tx.is_zero() => tx,
            Ok(_) => return None,
            Err(e) => {
                warn!(id = %record.id, error = %e, "skipping malformed tx hash");
                return None;
            }
        };

        let limit = self.config.status_timeout();
        let info = match timed(limit, self.chain.tx_status(&tx), || ChainError::Timeout {
            after_ms: millis(limit),
        })
        .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(id = %record.id, tx = %tx, error = %e, "tx status lookup failed");
                return Some(ActivityStatus::errored(record, e.to_string()));
            }
        };

        match info.status {
            // a lost tx seen again is back to submitted
            TxStatus::Pending => (record.mining_status == MiningStatus::Lost)
                .then(|| ActivityStatus::mining(record, MiningStatus::Submitted, 0)),
            TxStatus::Mined => Some(ActivityStatus::mining(record, MiningStatus::Mined, info.block_number)),
            TxStatus::Failed => Some(ActivityStatus::mining(record, MiningStatus::Failed, info.block_number)),
            TxStatus::Lost => Some(resolve_lost(record, now, mined_nonce, self.config.lost_expiry())),
        }
    }

    /// A record the venue reports done that the chain has not settled
    /// within the expiry: fail the chain side. Covers a tx the node still
    /// reports pending, a failed lookup, and a record with no tx at all.
    fn unresolved_after_done(
        &self,
        record: &ActivityRecord,
        exchange: Option<&ActivityStatus>,
        chain: Option<&ActivityStatus>,
        now: Timepoint,
    ) -> Option<ActivityStatus> {
        let exchange_status = exchange.map_or(record.exchange_status, |s| s.exchange_status);
        let settled = chain.is_some_and(|s| s.mining_status.is_terminal());
        if exchange_status != ExchangeStatus::Done || !record.is_blockchain_pending() || settled {
            return None;
        }
        if now.since(record.timestamp) <= self.config.lost_expiry() {
            return None;
        }
        info!(id = %record.id, action = %record.action, "done on venue but unsettled on chain past expiry");
        Some(ActivityStatus::mining(record, MiningStatus::Failed, 0))
    }

    fn apply_chain_balances(
        &self,
        snapshot: &mut AuthDataSnapshot,
        balances: Result<BTreeMap<TokenSymbol, BalanceEntry>, String>,
        previous: Option<&AuthDataSnapshot>,
        now: Timepoint,
    ) {
        let last = |token: &TokenSymbol| previous.and_then(|p| p.reserve_balances.get(token));

        match balances {
            Ok(balances) => {
                for (token, entry) in balances {
                    let entry = if entry.valid {
                        entry
                    } else {
                        snapshot.invalidate(format!("reserve balance {}: {}", token, entry.error));
                        match last(&token) {
                            Some(prev) => BalanceEntry::carried_from(prev, &entry),
                            None => entry,
                        }
                    };
                    snapshot.reserve_balances.insert(token, entry);
                }
            }
            Err(error) => {
                snapshot.invalidate(format!("reserve balances: {}", error));
                let failed = BalanceEntry::failed(error, now, Timepoint::now().max(now));
                if let Some(prev) = previous {
                    for (token, entry) in &prev.reserve_balances {
                        snapshot
                            .reserve_balances
                            .insert(token.clone(), BalanceEntry::carried_from(entry, &failed));
                    }
                }
            }
        }
    }
}

fn with_backfilled_tx(record: &ActivityRecord, exchange: Option<&ActivityStatus>) -> ActivityRecord {
    let mut record = record.clone();
    let missing = record.result.tx.as_deref().map_or(true, str::is_empty);
    if record.action == Action::Withdraw && missing {
        if let Some(tx) = exchange.and_then(|s| s.tx.as_deref()).filter(|t| !t.is_empty()) {
            record.result.tx = Some(tx.to_string());
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use reserve_types::ActivityResult;
    use rust_decimal_macros::dec;

    const EXPIRY: Duration = Duration::from_secs(15 * 60);

    fn set_rates(tp: u64, nonce: u64) -> ActivityRecord {
        let mut record = ActivityRecord::new(
            ActivityId::new(Timepoint(tp), "rates"),
            VenueId::blockchain(),
            ActivityParams::SetRates {
                tokens: vec!["KNC".into()],
                block: 100,
            },
            ActivityResult::with_tx(format!("0x{}", "ab".repeat(32))).with_nonce(nonce),
        );
        record.mining_status = MiningStatus::Submitted;
        record
    }

    #[test]
    fn lost_tx_with_confirmed_later_nonce_fails() {
        let record = set_rates(0, 7);
        let status = resolve_lost(&record, Timepoint(1_000), Some(8), EXPIRY);
        assert_eq!(status.mining_status, MiningStatus::Failed);
    }

    #[test]
    fn lost_tx_within_expiry_stays_lost() {
        let record = set_rates(0, 7);
        let status = resolve_lost(&record, Timepoint(1_000), Some(7), EXPIRY);
        assert_eq!(status.mining_status, MiningStatus::Lost);

        let status = resolve_lost(&record, Timepoint(1_000), None, EXPIRY);
        assert_eq!(status.mining_status, MiningStatus::Lost);
    }

    #[test]
    fn lost_tx_past_expiry_fails_without_nonce() {
        let record = set_rates(0, 7);
        let later = Timepoint(0).plus(Duration::from_secs(16 * 60));
        let status = resolve_lost(&record, later, None, EXPIRY);
        assert_eq!(status.mining_status, MiningStatus::Failed);
    }

    #[test]
    fn nonce_rule_only_applies_to_rate_setting() {
        let mut record = set_rates(0, 7);
        record.action = Action::Withdraw;
        record.params = ActivityParams::Withdraw {
            token: "KNC".into(),
            amount: dec!(1),
        };
        let status = resolve_lost(&record, Timepoint(1_000), Some(100), EXPIRY);
        assert_eq!(status.mining_status, MiningStatus::Lost);
    }

    #[test]
    fn withdraw_tx_is_backfilled_from_venue() {
        let record = ActivityRecord::new(
            ActivityId::new(Timepoint(1), "w1"),
            "binance".into(),
            ActivityParams::Withdraw {
                token: "KNC".into(),
                amount: dec!(3),
            },
            ActivityResult::default(),
        );
        let tx = format!("0x{}", "cd".repeat(32));
        let status = ActivityStatus::exchange(&record, ExchangeStatus::Done, Some(tx.clone()));

        let view = with_backfilled_tx(&record, Some(&status));
        assert_eq!(view.result.tx.as_deref(), Some(tx.as_str()));
        assert!(matches!(view.result.tx_hash(), Ok(Some(_))));
        assert_eq!(record.result.tx_hash(), Ok(None));
    }

    #[tokio::test]
    async fn timed_call_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<u64, ChainError>(1)
        };
        let reply = timed(Duration::from_millis(10), slow, || ChainError::Timeout { after_ms: 10 }).await;
        assert_eq!(reply, Err(ChainError::Timeout { after_ms: 10 }));
    }
}
