//! Generated gRPC wire types for the exchange/broker boundary.
//!
//! The message shapes and RPC names are fixed by the original venue's
//! wire protocol (`Create`/`Cancel`/`Statistic`/`Results`); see
//! `proto/exchange.proto` for field-level documentation.

tonic::include_proto!("exchange");

/// The two order sides carried as the wire's `type` string.
///
/// The proto keeps `type` as a bare `String` (matching the original
/// `varchar(10)` column), so conversions to/from this typed enum live
/// here rather than in the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub const BUY: &'static str = "buy";
    pub const SELL: &'static str = "sell";

    pub fn as_wire(self) -> &'static str {
        match self {
            Side::Buy => Self::BUY,
            Side::Sell => Self::SELL,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = SideParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::BUY => Ok(Side::Buy),
            Self::SELL => Ok(Side::Sell),
            other => Err(SideParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized order side on the wire: {0:?}")]
pub struct SideParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_roundtrips_through_the_wire_string() {
        for side in [Side::Buy, Side::Sell] {
            let wire = side.as_wire();
            assert_eq!(wire.parse::<Side>().unwrap(), side);
        }
    }

    #[test]
    fn unknown_side_string_is_rejected() {
        assert!("hold".parse::<Side>().is_err());
    }
}
