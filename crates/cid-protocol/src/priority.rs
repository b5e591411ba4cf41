//! Display priority derived from the event code prefix
//!
//! The rank only orders events for presentation. Nothing in the relay path
//! looks at it.

/// Priority class of an event, ordered by rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventPriority {
    /// Code too short to classify (rank 0)
    Unknown,
    /// Open/close reports, `E4xx` (rank 1)
    Guard,
    /// Trouble reports, `E3xx` (rank 2)
    Disguard,
    /// Alarm reports and their restores, `E1xx` / `R1xx` (rank 3)
    Ok,
    /// Test and miscellaneous reports, `E6xx` (rank 4)
    Alarm,
    /// Any other prefix (rank 5)
    Other,
}

impl EventPriority {
    /// Classify a qualifier+code string such as `E130`
    pub fn from_code(code: &str) -> Self {
        let mut chars = code.chars();
        let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
            return Self::Unknown;
        };

        match (first, second) {
            ('E', '4') => Self::Guard,
            ('E', '3') => Self::Disguard,
            ('E', '1') | ('R', '1') => Self::Ok,
            ('E', '6') => Self::Alarm,
            _ => Self::Other,
        }
    }

    /// Numeric rank used by presentation layers
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Guard => 1,
            Self::Disguard => 2,
            Self::Ok => 3,
            Self::Alarm => 4,
            Self::Other => 5,
        }
    }
}
