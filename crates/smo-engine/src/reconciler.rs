//! Reconciliation of terminal order callbacks against the runtime state.
//!
//! `apply_order` mutates the state by order purpose: entry fills set the
//! (weighted) entry price, exit fills accumulate the executed amount and
//! produce the PnL to persist. The id-dedup check lives in the executor's
//! in-flight map; by the time a record reaches here it is known fresh.

use rust_decimal::Decimal;
use tracing::debug;

use smo_core::{profit_amount, profit_pct, OrderRecord, Phase};

use crate::executor::OrderPurpose;
use crate::machine::PlanCell;

/// PnL of one exit fill, ready for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitFill {
    pub pct: Decimal,
    pub amount: Decimal,
}

/// What a reconciled order changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    /// Entry price (or weighted average) was updated.
    pub entry_updated: bool,
    /// An exit fill was accounted, with its PnL.
    pub exit_fill: Option<ExitFill>,
}

/// Apply a terminal order record to the runtime state.
pub fn apply_order(cell: &mut PlanCell, record: &OrderRecord, purpose: OrderPurpose) -> Applied {
    cell.state.retire_order(&record.id);

    if !record.status.is_fill() || !record.filled.is_positive() {
        debug!(order = %record.id, status = %record.status, "terminal without fill");
        return Applied::default();
    }

    match purpose {
        OrderPurpose::Entry | OrderPurpose::TrailingEntry => {
            cell.state.entry_price = record.average;
            cell.state.entry_filled = cell.state.entry_filled + record.filled;
            Applied {
                entry_updated: true,
                exit_fill: None,
            }
        }
        OrderPurpose::EntryLeg(_) => {
            // Weighted average across filled legs.
            let prev_filled = cell.state.entry_filled;
            let total = prev_filled + record.filled;
            let weighted = (cell.state.entry_price.inner() * prev_filled.inner()
                + record.average.inner() * record.filled.inner())
                / total.inner();
            cell.state.entry_price = smo_core::Price::new(weighted);
            cell.state.entry_filled = total;
            Applied {
                entry_updated: true,
                exit_fill: None,
            }
        }
        OrderPurpose::TakeProfit
        | OrderPurpose::StopLoss
        | OrderPurpose::ForcedLoss
        | OrderPurpose::WithoutLoss
        | OrderPurpose::Flatten => {
            cell.state.executed_amount = cell.state.executed_amount + record.filled;
            cell.state.exit_price = record.average;
            if cell.state.phase == Phase::HedgeLoss {
                cell.state.hedge_exit_price = record.average;
            }
            if purpose == OrderPurpose::Flatten {
                cell.state.position_was_closed = true;
            }

            let lev = cell.plan.effective_leverage();
            let pct = profit_pct(
                cell.state.entry_price,
                record.average,
                lev,
                cell.plan.entry.side,
            );
            let amount = profit_amount(record.filled, lev, cell.state.entry_price, pct);
            debug!(
                order = %record.id,
                filled = %record.filled,
                pnl_pct = %pct,
                pnl = %amount,
                "exit fill reconciled"
            );
            Applied {
                entry_updated: false,
                exit_fill: Some(ExitFill { pct, amount }),
            }
        }
    }
}
