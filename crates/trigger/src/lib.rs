//! Deadline trigger: periodic scans that synthesize reminder notifications.

pub mod ledger;
pub mod scanner;
