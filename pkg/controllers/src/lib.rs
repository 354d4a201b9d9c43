//! The reconciliation core: one controller observing scaling intents, one
//! worker task per bound intent.

pub mod intent;
pub mod worker;

pub use intent::IntentController;
pub use worker::TickOutcome;
