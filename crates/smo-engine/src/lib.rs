//! Per-plan execution runtime for smart orders.
//!
//! The crate is organized around a functional core and an async shell:
//! - `machine`: pure transition function over `(phase, trigger)`
//! - `planner`: pure `(step, plan, state, price) -> order` function
//! - `executor`: gateway submission with classified retries
//! - `reconciler`: terminal-callback accounting
//! - `timers`: iteration-scoped one-shot and periodic timers
//! - `runtime`: the event loop tying it all together

pub mod error;
pub mod executor;
pub mod machine;
pub mod planner;
pub mod reconciler;
pub mod runtime;
pub mod testsupport;
pub mod timers;

pub use error::{EngineError, EngineResult};
pub use executor::{OrderExecutor, OrderPurpose, SubmitOutcome};
pub use machine::{Action, PersistKind, PlanCell};
pub use planner::{plan_order, Planned, PlannedOrder, Step};
pub use reconciler::{apply_order, Applied, ExitFill};
pub use runtime::{EngineEvent, PlanRuntime, RuntimeConfig, POLL_INTERVAL};
pub use timers::TimerKind;
