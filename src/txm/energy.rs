//! Energy estimation and fee limits
//!
//! Estimates prefer the node's `estimateenergy` call. The first time a node
//! reports it unsupported, the estimator switches to constant-call dry runs
//! for the rest of its life. The unit price is cached per estimator and
//! refreshed from the node's price feed once the cache is older than the
//! refresh interval.

use super::errors::EstimateError;
use super::tx::TronTx;
use crate::ledger::{ContractCall, FullNodeClient, LedgerError};
use crate::logging::TxLogger;
use crate::tx_builder::abi;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fee limit and the inputs it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeLimit {
    pub energy: i64,
    pub unit_price: i64,
    pub fee_limit: i64,
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: i64,
    fetched_at: Instant,
}

/// Energy estimation plus the unit price cache
///
/// The price is refreshed lazily: the first lookup after `refresh_interval`
/// has elapsed fetches the feed inline. There is no separate refresh task,
/// so the manager keeps only its three loops.
pub struct EnergyEstimator {
    client: Arc<dyn FullNodeClient>,
    estimate_energy_enabled: AtomicBool,
    price: Mutex<Option<CachedPrice>>,
    refresh_interval: Duration,
    default_price: i64,
    logger: TxLogger,
}

impl EnergyEstimator {
    pub fn new(
        client: Arc<dyn FullNodeClient>,
        refresh_interval: Duration,
        default_price: i64,
        logger: TxLogger,
    ) -> Self {
        Self {
            client,
            estimate_energy_enabled: AtomicBool::new(true),
            price: Mutex::new(None),
            refresh_interval,
            default_price,
            logger,
        }
    }

    /// False once the node has reported `estimateenergy` unsupported
    pub fn estimate_energy_enabled(&self) -> bool {
        self.estimate_energy_enabled.load(Ordering::Relaxed)
    }

    /// Energy units the call is expected to consume
    pub async fn estimate_energy(&self, tx: &TronTx) -> Result<i64, EstimateError> {
        let call = ContractCall {
            owner_address: tx.from_address,
            contract_address: tx.contract_address,
            function_selector: tx.method.clone(),
            parameter: hex::encode(abi::encode_params(&tx.params)?),
            call_value: 0,
        };

        if self.estimate_energy_enabled() {
            match self.client.estimate_energy(&call).await {
                Ok(resp) => return Ok(resp.energy_required),
                Err(LedgerError::EstimateEnergyUnsupported) => {
                    self.estimate_energy_enabled.store(false, Ordering::Relaxed);
                    self.logger
                        .warn("estimateenergy unsupported by node, using constant-call dry runs");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let resp = self.client.trigger_constant_contract(&call).await?;
        if let Some(message) = resp.revert_message {
            return Err(EstimateError::Reverted { message });
        }
        Ok(resp.energy_used.saturating_add(resp.energy_penalty))
    }

    /// Current energy unit price in SUN; never zero
    pub async fn get_energy_unit_price(&self) -> i64 {
        if let Some(cached) = *self.price.lock() {
            if cached.fetched_at.elapsed() < self.refresh_interval {
                return cached.price;
            }
        }

        let price = match self.client.get_energy_prices().await {
            Ok(feed) => match parse_energy_price(&feed) {
                Some(0) => {
                    warn!(
                        default = self.default_price,
                        "Energy price feed reported zero, using default"
                    );
                    self.default_price
                }
                Some(price) => price,
                None => {
                    debug!(feed = %feed, "Malformed energy price feed, using default");
                    self.default_price
                }
            },
            Err(e) => {
                warn!(error = %e, "Energy price fetch failed, using default");
                // keep serving a stale price over the default when there is one
                if let Some(cached) = *self.price.lock() {
                    return cached.price;
                }
                return self.default_price;
            }
        };

        *self.price.lock() = Some(CachedPrice {
            price,
            fetched_at: Instant::now(),
        });
        price
    }

    /// `energy × unit price`
    pub async fn calculate_fee_limit(&self, tx: &TronTx) -> Result<FeeLimit, EstimateError> {
        let energy = self.estimate_energy(tx).await?;
        let unit_price = self.get_energy_unit_price().await;
        Ok(FeeLimit {
            energy,
            unit_price,
            fee_limit: energy.saturating_mul(unit_price),
        })
    }
}

/// Price of the last `timestamp:price` pair in the feed
///
/// `None` for an empty or malformed feed.
pub fn parse_energy_price(feed: &str) -> Option<i64> {
    let last = feed.trim().rsplit(',').next()?;
    let (_, price) = last.split_once(':')?;
    price.trim().parse::<i64>().ok().filter(|p| *p >= 0)
}

/// `floor(fee_limit × multiplier^bumps)`
pub fn padded_fee_limit(fee_limit: i64, multiplier: f64, bumps: u32) -> i64 {
    if bumps == 0 {
        return fee_limit;
    }
    let padded = (fee_limit as f64) * multiplier.powi(bumps.min(i32::MAX as u32) as i32);
    if padded >= i64::MAX as f64 {
        i64::MAX
    } else {
        padded.floor() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TronAddress;
    use crate::test_utils::MockFullNode;
    use crate::txm::tx::TxRequest;
    use proptest::prelude::*;

    fn tx() -> TronTx {
        let addr = TronAddress::from_evm_bytes(&[3; 20]);
        TronTx::new(
            "e1".into(),
            TxRequest::new(addr, addr, "transfer(address,uint256)").with_params(vec![
                "address".into(),
                addr.to_base58().into(),
                "uint256".into(),
                "5".into(),
            ]),
        )
    }

    fn estimator(node: Arc<MockFullNode>) -> EnergyEstimator {
        EnergyEstimator::new(node, Duration::from_secs(60), 420, TxLogger::new("test"))
    }

    #[test]
    fn test_parse_energy_price() {
        assert_eq!(parse_energy_price("0:100,1575331200000:10,1606537680000:420"), Some(420));
        assert_eq!(parse_energy_price("0:210"), Some(210));
        assert_eq!(parse_energy_price(""), None);
        assert_eq!(parse_energy_price("0:100,garbage"), None);
        assert_eq!(parse_energy_price("0:abc"), None);
    }

    #[tokio::test]
    async fn test_fee_limit_is_energy_times_price() {
        let node = Arc::new(MockFullNode::new());
        node.set_energy_required(14_200);
        node.set_energy_prices("0:100,1606537680000:420");
        let fee = estimator(node).calculate_fee_limit(&tx()).await.unwrap();
        assert_eq!(fee.fee_limit, 14_200 * 420);
        assert_eq!(padded_fee_limit(fee.fee_limit, 1.5, 1), 14_200 * 420 * 3 / 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_constant_call_once() {
        let node = Arc::new(MockFullNode::new());
        node.set_estimate_energy_supported(false);
        node.set_constant_energy(10_000, 250);
        let est = estimator(node.clone());

        assert_eq!(est.estimate_energy(&tx()).await.unwrap(), 10_250);
        assert!(!est.estimate_energy_enabled());
        assert_eq!(est.estimate_energy(&tx()).await.unwrap(), 10_250);
        // the unsupported call is not retried
        assert_eq!(node.estimate_energy_calls(), 1);
        assert_eq!(node.trigger_constant_calls(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_revert_is_an_error() {
        let node = Arc::new(MockFullNode::new());
        node.set_estimate_energy_supported(false);
        node.set_constant_revert(Some("REVERT opcode executed"));
        let err = estimator(node).estimate_energy(&tx()).await.unwrap_err();
        assert!(matches!(err, EstimateError::Reverted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_cache_and_fallbacks() {
        let node = Arc::new(MockFullNode::new());
        node.set_energy_prices("0:100,1:0");
        let est = estimator(node.clone());
        assert_eq!(est.get_energy_unit_price().await, 420);

        node.set_energy_prices("0:100,1:210");
        // cached for the refresh interval
        assert_eq!(est.get_energy_unit_price().await, 420);
        assert_eq!(node.energy_price_calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(est.get_energy_unit_price().await, 210);

        node.set_energy_prices("not a feed");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(est.get_energy_unit_price().await, 420);
    }

    proptest! {
        #[test]
        fn prop_no_bump_is_identity(fee in 0i64..(1i64 << 52), m in 1.0f64..4.0) {
            prop_assert_eq!(padded_fee_limit(fee, m, 0), fee);
        }

        #[test]
        fn prop_one_bump_at_nominal_multiplier(fee in 0i64..(1i64 << 50)) {
            prop_assert_eq!(padded_fee_limit(fee, 1.5, 1), fee * 3 / 2);
        }

        #[test]
        fn prop_padding_never_shrinks(fee in 0i64..(1i64 << 40), bumps in 0u32..6) {
            prop_assert!(padded_fee_limit(fee, 1.5, bumps + 1) >= padded_fee_limit(fee, 1.5, bumps));
        }
    }
}
