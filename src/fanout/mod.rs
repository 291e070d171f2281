// Fan-out — turning one consumed event into outbox, inbox, and point
// deliveries.

pub mod classify;
pub mod dispatcher;
pub mod plan;

pub use classify::{classify, Reach};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use plan::{plan, DeliveryPlan};
