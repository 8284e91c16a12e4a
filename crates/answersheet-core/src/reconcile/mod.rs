pub mod engine;
pub mod outcome;
pub mod plan;

pub use engine::{PageInput, Reconciler};
pub use outcome::{ContinuationOutcome, PageReport, PairingFault};
pub use plan::{plan_page, PagePlan, Pairing};
