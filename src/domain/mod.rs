mod currency;
mod money;
mod state;
mod transaction;
mod wallet;

pub use currency::*;
pub use money::*;
pub use state::*;
pub use transaction::*;
pub use wallet::*;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision the store keeps (microseconds), so values
/// read back compare equal to the ones written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
