pub mod check;
pub mod fingerprint;
pub mod report;
pub mod update;
pub mod vote;
