pub mod validator;

pub use validator::{CheatViolation, RangeValidator, ValidationConfig};
