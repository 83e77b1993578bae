pub mod rule;

pub use rule::{Direction, Endpoint, EndpointLiteral, IpVersion, Rule};
