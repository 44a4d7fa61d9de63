//! Migration wizard
//!
//! Four phases (Foundation, Core Data, Transactions, Content) gated by
//! prerequisites. The transition logic in [`machine`] is pure; the
//! [`session`] layer persists every accepted transition.

pub mod machine;
pub mod session;
pub mod types;

pub use machine::{transition, Transition, WizardAction};
pub use session::{RunClaim, SessionRegistry, TransitionOutcome, WizardSession};
pub use types::*;
