pub mod aggregation;
pub mod billing;
pub mod fanout;
pub mod init;
pub mod lifecycle;
pub mod localtime;
pub mod push;
pub mod reminders;

#[cfg(test)]
pub(crate) use testing::{test_state, test_state_with_transport};
