//! Suspension points.
//!
//! The `futures` module holds the leaf futures a task can suspend on. Each of
//! them registers the task with the loop's timer queue or readiness watcher on
//! first poll, and removes that registration again when dropped, so a task
//! that is cancelled while suspended leaves nothing behind.
//!
//! - `timer`: [EventLoop::wait](crate::EventLoop::wait), sleeping for a
//!   duration.
//! - `readiness`: [EventLoop::await_readable](crate::EventLoop::await_readable)
//!   and [EventLoop::await_writable](crate::EventLoop::await_writable).
//! - `manual`: [EventLoop::await_manual_resume](crate::EventLoop::await_manual_resume),
//!   parking a task until some other code resumes it.
//!
//! The remaining suspension point, waiting for another task, is
//! [Evaluation::result](crate::Evaluation::result).
pub mod manual;
pub mod readiness;
pub mod timer;
