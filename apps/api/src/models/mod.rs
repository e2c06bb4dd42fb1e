pub mod location;
pub mod verification;
