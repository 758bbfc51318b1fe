//! Gas estimation and fee policy

use crate::chain::{CallRequest, GasPrice, NodeClient};
use crate::config::{GasPriceStrategy, NetworkConfig};
use crate::contract::CallPayload;
use crate::error::{PipelineError, PipelineResult};

use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::debug;

const GWEI: u64 = 1_000_000_000;

/// Gas limit and price bound for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeParameters {
    pub gas_limit: U256,
    pub gas_price: GasPrice,
}

impl FeeParameters {
    /// Upper bound on what the transaction can cost in wei
    pub fn max_cost(&self) -> U256 {
        GasEstimator::calculate_cost(self.gas_limit, &self.gas_price)
    }
}

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 10 = 10% buffer)
    gas_limit_buffer_percent: u64,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new(gas_limit_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
        }
    }

    /// Ask the node to simulate the call from `sender`.
    ///
    /// This is the only pre-flight check that the call will not revert, so a
    /// rejected simulation is an error and never a default.
    pub async fn estimate<N: NodeClient + ?Sized>(
        &self,
        node: &N,
        payload: &CallPayload,
        sender: Address,
        destination: Address,
    ) -> PipelineResult<U256> {
        let request = CallRequest {
            from: Some(sender),
            to: destination,
            data: payload.to_bytes(),
        };

        let estimate = node.estimate_gas(&request).await?;
        if estimate.is_zero() {
            return Err(PipelineError::Estimation(
                "node returned a zero gas estimate".to_string(),
            ));
        }

        debug!("Gas estimate for {:?}: {}", destination, estimate);
        Ok(estimate)
    }

    /// Buffered gas limit, rounded up
    pub fn gas_limit(&self, estimate: U256) -> PipelineResult<U256> {
        let scaled = U256::from(self.gas_limit_buffer_percent)
            .checked_add(U256::from(100))
            .and_then(|factor| estimate.checked_mul(factor))
            .ok_or_else(|| {
                PipelineError::Estimation(format!(
                    "gas estimate {} overflows with a {}% buffer",
                    estimate, self.gas_limit_buffer_percent
                ))
            })?;
        let (quotient, remainder) = scaled.div_mod(U256::from(100));
        if remainder.is_zero() {
            Ok(quotient)
        } else {
            Ok(quotient + 1)
        }
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit.saturating_mul(*price),
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit.saturating_mul(*max_fee_per_gas),
        }
    }
}

/// Network gas price policy
#[derive(Debug, Clone)]
pub struct FeePolicy {
    strategy: GasPriceStrategy,
    fixed_price: Option<U256>,
    /// Cap applied to node-suggested prices
    max_gas_price: U256,
    priority_fee: U256,
}

impl FeePolicy {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            strategy: config.gas_price_strategy,
            fixed_price: config.gas_price_wei.map(U256::from),
            max_gas_price: U256::from(config.max_gas_price_gwei) * U256::from(GWEI),
            priority_fee: U256::from(2 * GWEI),
        }
    }

    /// Gas price for the next transaction
    pub async fn gas_price<N: NodeClient + ?Sized>(&self, node: &N) -> PipelineResult<GasPrice> {
        let price = match self.strategy {
            GasPriceStrategy::Fixed => {
                let price = self.fixed_price.ok_or_else(|| {
                    PipelineError::Config("fixed gas price strategy without gas_price_wei".to_string())
                })?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Legacy => {
                let price = node.gas_price().await?;
                GasPrice::Legacy(std::cmp::min(price, self.max_gas_price))
            }
            GasPriceStrategy::Eip1559 => {
                let base_fee = node.base_fee().await?.ok_or_else(|| {
                    PipelineError::Estimation("No base fee in latest block".to_string())
                })?;

                // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
                let max_fee = std::cmp::min(base_fee * 2 + self.priority_fee, self.max_gas_price);
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: std::cmp::min(self.priority_fee, max_fee),
                }
            }
        };

        debug!("Gas price: {:?}", price);
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockNodeClient;
    use std::collections::HashMap;

    fn network(strategy: GasPriceStrategy) -> NetworkConfig {
        NetworkConfig {
            chain_id: 1337,
            rpc_url: "http://localhost:8545".to_string(),
            gas_price_strategy: strategy,
            gas_price_wei: Some(50 * GWEI),
            max_gas_price_gwei: 100,
            private_key_env: "TEST_PK".to_string(),
            contracts: HashMap::new(),
        }
    }

    fn payload() -> CallPayload {
        CallPayload {
            selector: [0x12, 0x34, 0x56, 0x78],
            arguments: vec![0; 64],
        }
    }

    #[test]
    fn test_gas_limit_rounds_up() {
        let estimator = GasEstimator::new(10);
        assert_eq!(estimator.gas_limit(U256::from(100)).unwrap(), U256::from(110));
        assert_eq!(estimator.gas_limit(U256::from(53_214)).unwrap(), U256::from(58_536));

        let exact = GasEstimator::new(0);
        assert_eq!(exact.gas_limit(U256::from(53_214)).unwrap(), U256::from(53_214));
    }

    #[test]
    fn test_gas_limit_overflow_is_error() {
        let result = GasEstimator::new(10).gas_limit(U256::MAX);
        assert!(matches!(result, Err(PipelineError::Estimation(_))));
    }

    #[tokio::test]
    async fn test_estimate_uses_sender_and_payload() {
        let sender = Address::repeat_byte(0x01);
        let destination = Address::repeat_byte(0x02);
        let mut node = MockNodeClient::new();
        node.expect_estimate_gas()
            .withf(move |req| {
                req.from == Some(sender) && req.to == destination && req.data.len() == 68
            })
            .returning(|_| Ok(U256::from(45_000)));

        let estimate = GasEstimator::new(10)
            .estimate(&node, &payload(), sender, destination)
            .await
            .unwrap();
        assert_eq!(estimate, U256::from(45_000));
    }

    #[tokio::test]
    async fn test_revert_surfaces_as_error() {
        let mut node = MockNodeClient::new();
        node.expect_estimate_gas()
            .returning(|_| Err(PipelineError::Estimation("execution reverted".to_string())));

        let result = GasEstimator::new(10)
            .estimate(&node, &payload(), Address::zero(), Address::repeat_byte(0x02))
            .await;
        tokio_test::assert_err!(&result);
        assert!(matches!(result, Err(PipelineError::Estimation(_))));
    }

    #[tokio::test]
    async fn test_zero_estimate_is_error() {
        let mut node = MockNodeClient::new();
        node.expect_estimate_gas().returning(|_| Ok(U256::zero()));

        let result = GasEstimator::new(10)
            .estimate(&node, &payload(), Address::zero(), Address::repeat_byte(0x02))
            .await;
        assert!(matches!(result, Err(PipelineError::Estimation(_))));
    }

    #[tokio::test]
    async fn test_fixed_price_skips_node() {
        let node = MockNodeClient::new();
        let price = FeePolicy::from_config(&network(GasPriceStrategy::Fixed))
            .gas_price(&node)
            .await
            .unwrap();
        assert_eq!(price, GasPrice::Legacy(U256::from(50 * GWEI)));
    }

    #[tokio::test]
    async fn test_legacy_price_is_capped() {
        let mut node = MockNodeClient::new();
        node.expect_gas_price()
            .returning(|| Ok(U256::from(500 * GWEI)));

        let price = FeePolicy::from_config(&network(GasPriceStrategy::Legacy))
            .gas_price(&node)
            .await
            .unwrap();
        assert_eq!(price, GasPrice::Legacy(U256::from(100 * GWEI)));
    }

    #[tokio::test]
    async fn test_eip1559_price() {
        let mut node = MockNodeClient::new();
        node.expect_base_fee()
            .returning(|| Ok(Some(U256::from(10 * GWEI))));

        let price = FeePolicy::from_config(&network(GasPriceStrategy::Eip1559))
            .gas_price(&node)
            .await
            .unwrap();
        assert_eq!(
            price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(22 * GWEI),
                max_priority_fee_per_gas: U256::from(2 * GWEI),
            }
        );
    }

    #[tokio::test]
    async fn test_eip1559_without_base_fee() {
        let mut node = MockNodeClient::new();
        node.expect_base_fee().returning(|| Ok(None));

        let result = FeePolicy::from_config(&network(GasPriceStrategy::Eip1559))
            .gas_price(&node)
            .await;
        assert!(matches!(result, Err(PipelineError::Estimation(_))));
    }

    #[test]
    fn test_max_cost() {
        let fee = FeeParameters {
            gas_limit: U256::from(100_000),
            gas_price: GasPrice::Legacy(U256::from(50 * GWEI)),
        };
        assert_eq!(fee.max_cost(), U256::from(5_000_000u64) * U256::from(GWEI));
    }
}
