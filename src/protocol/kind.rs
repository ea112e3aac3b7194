use std::fmt;

/// AggregationKind selects how samples for one metric name are reduced
/// within a window. Tag values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AggregationKind {
    Sum = 42,
    Average = 43,
    Peak = 44,
    Min = 45,
}

impl AggregationKind {
    /// All kinds in tag order.
    pub const ALL: [Self; 4] = [Self::Sum, Self::Average, Self::Peak, Self::Min];

    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Peak => "peak",
            Self::Min => "min",
        }
    }

    /// Returns the wire tag.
    pub const fn tag(self) -> u16 {
        self as u16
    }

    /// Convert from a raw wire tag.
    pub fn from_tag(v: u16) -> Option<Self> {
        match v {
            42 => Some(Self::Sum),
            43 => Some(Self::Average),
            44 => Some(Self::Peak),
            45 => Some(Self::Min),
            _ => None,
        }
    }

    /// Convert from the canonical label name. Matching is case-insensitive
    /// and accepts `avg`/`max` as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "average" | "avg" => Some(Self::Average),
            "peak" | "max" => Some(Self::Peak),
            "min" => Some(Self::Min),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
