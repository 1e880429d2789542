//! Order submission and cancellation.
//!
//! Thin on purpose: serialize the request, post it through the gateway,
//! classify failures, and keep the per-plan in-flight map. Retry sleeps
//! happen here, never under the transition lock.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use smo_core::{OrderId, OrderRequest, Plan};
use smo_gateway::{
    classify_message, CancelRequest, GatewayFault, GatewayResult, TradingGateway,
};

/// Why an order was placed; drives reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPurpose {
    Entry,
    TrailingEntry,
    EntryLeg(usize),
    TakeProfit,
    StopLoss,
    ForcedLoss,
    WithoutLoss,
    Flatten,
}

impl OrderPurpose {
    /// Trailing purposes get the immediate-trigger demotion instead of the
    /// cancel flow.
    pub fn is_trailing(&self) -> bool {
        matches!(self, Self::TrailingEntry)
    }
}

/// Outcome of a submission after retries and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted; the id is registered in the in-flight map.
    Placed(OrderId),
    /// Stop rejected as immediate-trigger and demoted to a market order.
    PlacedDemoted(OrderId),
    /// Immediate-trigger on a non-trailing step: run the cancel flow.
    CancelPlan,
    /// Reduce-only rejected: disable the plan, no retry.
    DisablePlan,
    /// Unrecognized rejection: park the plan in `Error` with this message.
    Fatal(String),
}

/// Submits requests for one plan and tracks its in-flight ids.
pub struct OrderExecutor {
    gateway: Arc<dyn TradingGateway>,
    plan_id: smo_core::PlanId,
    /// id -> purpose for every order awaiting a terminal callback.
    in_flight: Mutex<HashMap<OrderId, OrderPurpose>>,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn TradingGateway>, plan_id: smo_core::PlanId) -> Self {
        Self {
            gateway,
            plan_id,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an id is still awaiting its terminal callback.
    pub fn is_in_flight(&self, id: &OrderId) -> bool {
        self.in_flight.lock().contains_key(id)
    }

    /// Atomically take an id out of the in-flight map.
    ///
    /// Returns `None` when the id was already handled; callers treat that as
    /// a duplicate callback and return.
    pub fn take_in_flight(&self, id: &OrderId) -> Option<OrderPurpose> {
        self.in_flight.lock().remove(id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Submit an order, applying the classified retry table.
    pub async fn submit(
        &self,
        plan: &Plan,
        request: OrderRequest,
        purpose: OrderPurpose,
    ) -> GatewayResult<SubmitOutcome> {
        let mut request = request;
        let mut demoted = false;
        let mut retries: HashMap<&'static str, u32> = HashMap::new();

        loop {
            let response = match self.gateway.create_order(&plan.account_key, &request).await {
                Ok(response) => response,
                Err(err) => {
                    // Transport failure: retry on the network schedule.
                    let Some(spec) = GatewayFault::Network.retry_spec() else {
                        return Err(err);
                    };
                    let used = retries.entry("network").or_insert(0);
                    if *used >= spec.max_retries {
                        return Err(err);
                    }
                    *used += 1;
                    warn!(plan = %self.plan_id, error = %err, "gateway unreachable, retrying");
                    tokio::time::sleep(spec.delay).await;
                    continue;
                }
            };

            if response.is_ok() {
                if let Some(id) = response.order_id().cloned() {
                    self.in_flight.lock().insert(id.clone(), purpose);
                    debug!(plan = %self.plan_id, order = %id, ?purpose, "order placed");
                    return Ok(if demoted {
                        SubmitOutcome::PlacedDemoted(id)
                    } else {
                        SubmitOutcome::Placed(id)
                    });
                }
                // OK without an id is a service bug; treat as fatal.
                return Ok(SubmitOutcome::Fatal("gateway returned OK without id".into()));
            }

            let fault = classify_message(response.message());
            if let Some(spec) = fault.retry_spec() {
                let key: &'static str = match fault {
                    GatewayFault::KeyProcessing => "key",
                    GatewayFault::PositionSideMismatch => "position_side",
                    _ => "invalid_json",
                };
                let used = retries.entry(key).or_insert(0);
                if *used >= spec.max_retries {
                    return Ok(SubmitOutcome::Fatal(response.message().to_string()));
                }
                *used += 1;
                info!(
                    plan = %self.plan_id,
                    fault = %fault,
                    attempt = *used,
                    "transient gateway fault, retrying"
                );
                smo_telemetry::metrics::GATEWAY_RETRIES
                    .with_label_values(&[key])
                    .inc();
                tokio::time::sleep(spec.delay).await;
                continue;
            }
            match &fault {
                GatewayFault::ImmediateTrigger => {
                    if purpose.is_trailing() && !demoted {
                        // The market already crossed the trailing trigger:
                        // take it as a market order instead.
                        info!(plan = %self.plan_id, "trailing stop would trigger immediately, demoting to market");
                        request.order_type = "market".to_string();
                        request.stop_price = None;
                        request.params.advanced_type = None;
                        demoted = true;
                    } else {
                        return Ok(SubmitOutcome::CancelPlan);
                    }
                }
                GatewayFault::ReduceOnlyRejected => {
                    warn!(plan = %self.plan_id, "reduce-only rejected, disabling plan");
                    return Ok(SubmitOutcome::DisablePlan);
                }
                GatewayFault::Other(msg) => {
                    warn!(plan = %self.plan_id, msg, "unrecognized gateway rejection");
                    return Ok(SubmitOutcome::Fatal(msg.clone()));
                }
                // Transient faults were consumed by the retry branch above.
                _ => return Ok(SubmitOutcome::Fatal(response.message().to_string())),
            }
        }
    }

    /// Cancel one order.
    pub async fn cancel(&self, plan: &Plan, id: &OrderId) -> GatewayResult<()> {
        let request = CancelRequest::new(
            id.clone(),
            plan.symbol.as_str(),
            plan.market_kind.wire_name(),
        );
        let response = self.gateway.cancel_order(&plan.account_key, &request).await?;
        if !response.is_ok() {
            debug!(plan = %self.plan_id, order = %id, msg = response.message(), "cancel rejected");
        }
        Ok(())
    }

    /// Cancel many orders concurrently (futures).
    pub async fn cancel_all(&self, plan: &Plan, ids: &[OrderId]) {
        let futures = ids.iter().map(|id| self.cancel(plan, id));
        for (id, result) in ids.iter().zip(join_all(futures).await) {
            if let Err(err) = result {
                warn!(plan = %self.plan_id, order = %id, error = %err, "cancel failed");
            }
        }
    }

    /// Cancel many orders one at a time (spot: concurrent cancels race the
    /// exchange-side balance accounting).
    pub async fn cancel_all_consistently(&self, plan: &Plan, ids: &[OrderId]) {
        for id in ids {
            if let Err(err) = self.cancel(plan, id).await {
                warn!(plan = %self.plan_id, order = %id, error = %err, "cancel failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{plan_builder, MockGateway};
    use rust_decimal_macros::dec;
    use smo_core::{OrderSide, OrderVariant, Price, Qty};

    fn request() -> OrderRequest {
        OrderRequest {
            symbol: "BTC_USDT".into(),
            market_type: "futures".into(),
            order_type: OrderVariant::Market.wire_type().into(),
            side: OrderSide::Buy,
            amount: Qty::new(dec!(0.05)),
            price: Price::new(dec!(7000)),
            stop_price: None,
            reduce_only: None,
            position_side: None,
            time_in_force: None,
            post_only: None,
            params: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_submit_registers_in_flight() {
        let gateway = Arc::new(MockGateway::new());
        let executor = OrderExecutor::new(gateway.clone(), smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::Entry)
            .await
            .unwrap();
        let SubmitOutcome::Placed(id) = outcome else {
            panic!("expected Placed");
        };
        assert!(executor.is_in_flight(&id));
        assert_eq!(gateway.create_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_take_in_flight_is_at_most_once() {
        let gateway = Arc::new(MockGateway::new());
        let executor = OrderExecutor::new(gateway, smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::TakeProfit)
            .await
            .unwrap();
        let SubmitOutcome::Placed(id) = outcome else {
            panic!("expected Placed");
        };

        assert_eq!(
            executor.take_in_flight(&id),
            Some(OrderPurpose::TakeProfit)
        );
        // Second take is a duplicate.
        assert_eq!(executor.take_in_flight(&id), None);
    }

    #[tokio::test]
    async fn test_reduce_only_rejection_disables() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next("ReduceOnly Order is rejected.");
        let executor = OrderExecutor::new(gateway, smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::StopLoss)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::DisablePlan);
    }

    #[tokio::test]
    async fn test_unknown_rejection_is_fatal() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next("margin is insufficient");
        let executor = OrderExecutor::new(gateway, smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::Entry)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Fatal("margin is insufficient".into())
        );
    }

    #[tokio::test]
    async fn test_immediate_trigger_demotes_trailing() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next("Order would immediately trigger.");
        let executor = OrderExecutor::new(gateway.clone(), smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let mut stop_request = request();
        stop_request.order_type = "stop".into();
        stop_request.stop_price = Some(Price::new(dec!(6952.09)));

        let outcome = executor
            .submit(&plan, stop_request, OrderPurpose::TrailingEntry)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::PlacedDemoted(_)));

        // The retried request went out as a plain market order.
        let calls = gateway.create_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].order_type, "market");
        assert!(calls[1].stop_price.is_none());
    }

    #[tokio::test]
    async fn test_immediate_trigger_cancels_non_trailing() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next("Order would immediately trigger.");
        let executor = OrderExecutor::new(gateway, smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::TakeProfit)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::CancelPlan);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fault_retries_then_succeeds() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next("invalid json");
        let executor = OrderExecutor::new(gateway.clone(), smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::Entry)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Placed(_)));
        assert_eq!(gateway.create_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fault_exhausts_retries() {
        let gateway = Arc::new(MockGateway::new());
        // invalid json allows 3 retries; fail 4 attempts total.
        for _ in 0..4 {
            gateway.fail_next("invalid json");
        }
        let executor = OrderExecutor::new(gateway.clone(), smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let outcome = executor
            .submit(&plan, request(), OrderPurpose::Entry)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Fatal(_)));
        assert_eq!(gateway.create_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_all_consistently_is_serial() {
        let gateway = Arc::new(MockGateway::new());
        let executor = OrderExecutor::new(gateway.clone(), smo_core::PlanId::new("p"));
        let plan = plan_builder().build();

        let ids = vec![OrderId::from("a"), OrderId::from("b")];
        executor.cancel_all_consistently(&plan, &ids).await;
        let cancels = gateway.cancel_calls();
        assert_eq!(cancels.len(), 2);
        assert_eq!(cancels[0].order_id, OrderId::from("a"));
        assert_eq!(cancels[1].order_id, OrderId::from("b"));
    }
}
