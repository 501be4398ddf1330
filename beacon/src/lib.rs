//! Beacon turns domain events into structured reports and forwards them to
//! a remote collector.
//!
//! Report definitions are declared once at startup, committed into a
//! [`ReportRegistry`], and frozen together with the [`Config`] into a
//! [`Tracker`]. Each trigger firing resolves the definition against the
//! watched instance and hands the finished [`Action`] to the
//! [`Dispatcher`], which sends it synchronously, enqueues it, or defers it.
extern crate self as beacon;

pub mod action;
pub mod config;
pub mod context;
pub mod deferred;
pub mod definition;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod sender;
pub mod tracker;

pub use action::Action;
pub use beacon_proc_macros::Watchable;
pub use config::{Config, EnablePolicy, IdentityConfig, QueueSelection};
pub use context::RecordContext;
pub use definition::{ReportDefinition, Trigger};
pub use dispatcher::{Dispatcher, RunOutcome, Strategy};
pub use error::{ReportError, Result};
pub use registry::{ReportHandle, ReportRegistry};
pub use resolver::{CallSpec, Watchable};
pub use tracker::{ReportHook, Tracker, TrackerBuilder};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;

    pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Value {
        serde_json::to_value(value).unwrap_or(Value::Null)
    }
}
