mod parser;
mod validator;

pub use parser::{parse_direction, parse_policy_file, PolicyFile, PolicyRule};
pub use validator::validate_policy;
