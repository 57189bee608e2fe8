pub mod audit_log;
pub mod pet;
pub mod pet_match;
pub mod user;
