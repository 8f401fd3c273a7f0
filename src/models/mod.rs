mod account;
mod list;
mod notification;
mod todo;

pub use account::*;
pub use list::*;
pub use notification::*;
pub use todo::*;

use serde::{Deserialize, Deserializer};

/// Ordered permission levels. A holder of a level may do everything the
/// levels below it allow.
pub trait Capability: Ord + Copy + 'static {
    /// Every level, lowest first.
    const LEVELS: &'static [Self];

    /// The name stored in permission columns.
    fn name(self) -> &'static str;

    fn allows(self, required: Self) -> bool {
        self >= required
    }

    /// Levels whose holders may do what `required` permits.
    fn at_least(required: Self) -> Vec<Self> {
        Self::LEVELS
            .iter()
            .copied()
            .filter(|level| level.allows(required))
            .collect()
    }
}

/// Lets an update payload tell "leave unchanged" (field absent) apart from
/// "clear" (field set to `null`).
pub(crate) fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
