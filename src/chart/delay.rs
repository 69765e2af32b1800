//! Identifiers of delayed transitions.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a delayed transition: `after(<delayName>)#<stateId>`.
///
/// The id doubles as the timer id, so it must round-trip through
/// continuation payloads. Parsing it recovers the owning state and the
/// delay function name.
///
/// # Example
///
/// ```rust
/// use diachronic::chart::DelayId;
///
/// let id: DelayId = "after(reminder)#greeter.heyed".parse().unwrap();
/// assert_eq!(id.delay_name, "reminder");
/// assert_eq!(id.state_id, "greeter.heyed");
/// assert_eq!(id.to_string(), "after(reminder)#greeter.heyed");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DelayId {
    /// Name of the delay function, or a literal millisecond count
    pub delay_name: String,
    /// Id of the state node that arms the delay
    pub state_id: String,
}

/// Error for ids that are not well-formed delay identifiers.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Malformed delay id '{0}'")]
pub struct DelayIdError(pub String);

impl DelayId {
    pub fn new(delay_name: impl Into<String>, state_id: impl Into<String>) -> Self {
        Self {
            delay_name: delay_name.into(),
            state_id: state_id.into(),
        }
    }
}

impl fmt::Display for DelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "after({})#{}", self.delay_name, self.state_id)
    }
}

impl FromStr for DelayId {
    type Err = DelayIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || DelayIdError(raw.to_string());
        let rest = raw.strip_prefix("after(").ok_or_else(malformed)?;
        let (delay_name, state_id) = rest.split_once(")#").ok_or_else(malformed)?;
        if delay_name.is_empty() || state_id.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(delay_name, state_id))
    }
}
